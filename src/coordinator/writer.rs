//! Second phase of the dual-write: projecting facts into the graph.
//!
//! The local write records a `pending` row in `graph_writes` inside its own
//! transaction. [`GraphWriteQueue`] then drains jobs on a background task and
//! records `done` or `failed`, so completion is always observable by the auditor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::{CortexError, Result};
use crate::facts::{Fact, GraphWriteStatus, LocalFactStore};
use crate::graph::{DocumentMetadata, EntityWrite, GraphStore, RelationWrite, WriteStatus};
use crate::language::LanguageServices;

/// What a projection wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub entities_created: usize,
    pub entities_updated: usize,
    pub relations: usize,
    /// Set when the fact went in as a raw-text document instead.
    pub document_id: Option<String>,
}

/// Turns a fact into graph writes: restated text, its entities, and the relations
/// between them. Falls back to uploading the text when extraction fails or finds
/// nothing to anchor on.
pub struct GraphProjector {
    graph: Arc<dyn GraphStore>,
    language: Arc<dyn LanguageServices>,
    entity_type: String,
}

impl GraphProjector {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        language: Arc<dyn LanguageServices>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            language,
            entity_type: entity_type.into(),
        }
    }

    /// The standalone sentence a fact is projected as. Raw text if restating fails.
    pub fn restated(&self, content: &str) -> String {
        match self.language.restate(content) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "restate failed, using raw text");
                content.to_string()
            }
        }
    }

    /// Entity the graph copy of a fact is keyed on.
    pub fn primary_entity(&self, content: &str) -> Option<String> {
        self.language.primary_entity(&self.restated(content))
    }

    pub async fn project(&self, fact: &Fact) -> Result<Projection> {
        let text = self.restated(&fact.content);

        let entities = match self.language.extract_entities(&text) {
            Ok(entities) if !entities.is_empty() => entities,
            Ok(_) => return self.upload(fact, &text).await,
            Err(e) => {
                tracing::warn!(
                    fact_id = %fact.fact_id,
                    error = %e,
                    "entity extraction failed, uploading raw text"
                );
                return self.upload(fact, &text).await;
            }
        };
        let relations = self.language.extract_relations(&text).unwrap_or_else(|e| {
            tracing::warn!(fact_id = %fact.fact_id, error = %e, "relation extraction failed");
            Vec::new()
        });

        let mut projection = Projection::default();
        let mut first_error: Option<CortexError> = None;
        let attempted = entities.len() + relations.len();

        for name in entities {
            let write = EntityWrite {
                entity_name: name,
                entity_type: self.entity_type.clone(),
                description: text.clone(),
            };
            match self.graph.write_entity(&write).await {
                Ok(WriteStatus::Created) => projection.entities_created += 1,
                Ok(WriteStatus::Ok) => projection.entities_updated += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        for relation in relations {
            let write = RelationWrite {
                subject: relation.subject,
                predicate: relation.predicate,
                object: relation.object,
                description: text.clone(),
            };
            match self.graph.write_relation(&write).await {
                Ok(_) => projection.relations += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                let written = projection.entities_created
                    + projection.entities_updated
                    + projection.relations;
                if written > 0 {
                    tracing::warn!(
                        fact_id = %fact.fact_id,
                        written,
                        attempted,
                        error = %e,
                        "graph write partially failed"
                    );
                }
                Err(e)
            }
            None => Ok(projection),
        }
    }

    async fn upload(&self, fact: &Fact, text: &str) -> Result<Projection> {
        let metadata = DocumentMetadata {
            source: Some(format!("fact:{}", fact.fact_id)),
            ..Default::default()
        };
        let doc_id = self.graph.upload_document(text, &metadata).await?;
        Ok(Projection {
            document_id: Some(doc_id),
            ..Default::default()
        })
    }
}

/// Project `fact` and record the result in `graph_writes`.
///
/// A graph failure is logged and recorded as `failed`; it is never escalated
/// past the queue. Only a failure to record the outcome is returned.
pub async fn sync_fact(
    projector: &GraphProjector,
    store: &LocalFactStore,
    owner_id: &str,
    fact: &Fact,
) -> Result<std::result::Result<Projection, CortexError>> {
    match projector.project(fact).await {
        Ok(projection) => {
            store.mark_graph_done(owner_id, &fact.fact_id).await?;
            tracing::info!(
                fact_id = %fact.fact_id,
                owner = %owner_id,
                entities = projection.entities_created + projection.entities_updated,
                relations = projection.relations,
                document = projection.document_id.is_some(),
                "fact projected into graph"
            );
            Ok(Ok(projection))
        }
        Err(e) => {
            tracing::warn!(
                fact_id = %fact.fact_id,
                owner = %owner_id,
                error = %e,
                "graph write failed"
            );
            store.mark_graph_failed(owner_id, &fact.fact_id, &e.to_string()).await?;
            Ok(Err(e))
        }
    }
}

#[derive(Debug, Clone)]
struct GraphJob {
    owner_id: String,
    fact_id: String,
}

/// Background queue of graph writes with an observable in-flight count.
pub struct GraphWriteQueue {
    tx: mpsc::UnboundedSender<GraphJob>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl GraphWriteQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<LocalFactStore>, projector: Arc<GraphProjector>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<GraphJob>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let worker_in_flight = in_flight.clone();
        let worker_idle = idle.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = run_job(&store, &projector, &job).await {
                    tracing::error!(
                        fact_id = %job.fact_id,
                        error = %e,
                        "could not record graph write outcome"
                    );
                }
                if worker_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
            tracing::debug!("graph write worker stopped");
        });

        Self { tx, in_flight, idle }
    }

    pub fn enqueue(&self, owner_id: &str, fact_id: &str) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let job = GraphJob {
            owner_id: owner_id.to_string(),
            fact_id: fact_id.to_string(),
        };
        if self.tx.send(job).is_err() {
            tracing::error!(fact_id, "graph write worker is gone; write stays pending");
            if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
        }
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once every queued job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run_job(store: &LocalFactStore, projector: &GraphProjector, job: &GraphJob) -> Result<()> {
    // Only the active identity's graph is written, and it stays active until the
    // last write of this fact has gone out.
    let _lease = match store.identity().lease(&job.owner_id).await {
        Ok(lease) => lease,
        Err(CortexError::CrossIdentityAccess { active, .. }) => {
            tracing::debug!(
                fact_id = %job.fact_id,
                owner = %job.owner_id,
                current = %active,
                "owner no longer active, leaving graph write pending"
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let fact = match store.get(&job.fact_id).await {
        Ok(fact) => fact,
        Err(CortexError::NotFound(_)) => {
            tracing::debug!(fact_id = %job.fact_id, "fact gone before its graph write ran");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if !fact.is_active() || fact.owner_id != job.owner_id {
        return Ok(());
    }
    if store.graph_write_status(&fact.fact_id).await? == Some(GraphWriteStatus::Done) {
        return Ok(());
    }

    sync_fact(projector, store, &job.owner_id, &fact).await?;
    Ok(())
}
