//! Knowledge coordination: dual writes and mode-routed queries across the local
//! fact store and the graph service.

pub mod routing;
pub mod writer;

pub use routing::{KnowledgeMode, Route, RouteDecision, RoutingPolicy, AUTO_GRAPH_MODE};
pub use writer::{GraphProjector, GraphWriteQueue, Projection};

use serde::Serialize;
use std::sync::Arc;

use crate::config::{GraphConfig, RoutingConfig};
use crate::error::{CortexError, Result};
use crate::facts::{FactSource, LocalFactStore, ScoredFact, StoreOutcome};
use crate::graph::{GraphAnswer, GraphQuery, GraphStore, QueryMode};
use crate::language::LanguageServices;

/// How one store fared while answering a query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Answered { hits: usize },
    Empty,
    LowConfidence { top_score: f64 },
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteAttempt {
    pub route: Route,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Everything a caller needs to judge an answer, including how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerBundle {
    pub query: String,
    pub requested_mode: String,
    /// `None` when neither store had anything.
    pub answered_by: Option<Route>,
    pub facts: Vec<ScoredFact>,
    pub graph_answer: Option<GraphAnswer>,
    /// A backing store was unavailable and the answer came from the other one.
    pub degraded: bool,
    pub fallback_used: bool,
    pub attempts: Vec<RouteAttempt>,
}

impl AnswerBundle {
    fn new(query: &str, mode: KnowledgeMode) -> Self {
        Self {
            query: query.to_string(),
            requested_mode: mode.to_string(),
            answered_by: None,
            facts: Vec::new(),
            graph_answer: None,
            degraded: false,
            fallback_used: false,
            attempts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answered_by.is_none()
    }
}

enum Attempt {
    Local(Vec<ScoredFact>),
    Graph(GraphAnswer),
}

pub struct KnowledgeCoordinator {
    store: Arc<LocalFactStore>,
    graph: Arc<dyn GraphStore>,
    language: Arc<dyn LanguageServices>,
    policy: RoutingPolicy,
    top_k: usize,
    response_type: String,
    projector: Arc<GraphProjector>,
    writes: GraphWriteQueue,
}

impl KnowledgeCoordinator {
    /// Build the coordinator and spawn its graph-write worker.
    pub fn new(
        store: Arc<LocalFactStore>,
        graph: Arc<dyn GraphStore>,
        language: Arc<dyn LanguageServices>,
        graph_config: &GraphConfig,
        routing: &RoutingConfig,
    ) -> Self {
        let projector = Arc::new(GraphProjector::new(
            graph.clone(),
            language.clone(),
            graph_config.default_entity_type.clone(),
        ));
        let writes = GraphWriteQueue::spawn(store.clone(), projector.clone());
        Self {
            store,
            graph,
            language,
            policy: RoutingPolicy::from(routing),
            top_k: graph_config.top_k,
            response_type: graph_config.response_type.clone(),
            projector,
            writes,
        }
    }

    pub fn store(&self) -> &Arc<LocalFactStore> {
        &self.store
    }

    pub fn projector(&self) -> &Arc<GraphProjector> {
        &self.projector
    }

    /// Write a fact locally and, when `dual`, queue its graph projection.
    ///
    /// Returns as soon as the local write commits. The graph write is observable
    /// through [`pending_graph_writes`](Self::pending_graph_writes).
    pub async fn store_fact(
        &self,
        content: &str,
        topics: &[String],
        dual: bool,
    ) -> Result<StoreOutcome> {
        let source = if dual { FactSource::Both } else { FactSource::Local };
        let owner = self.store.identity().current().await?;
        let outcome = self.store.store_with_source(content, topics, source).await?;
        if outcome.graph_write_queued {
            self.writes.enqueue(&owner, &outcome.fact_id);
        }
        tracing::info!(
            fact_id = %outcome.fact_id,
            deduplicated = outcome.deduplicated,
            dual,
            "fact stored"
        );
        Ok(outcome)
    }

    /// Supersede a fact. A dual-sourced fact's replacement is projected again.
    pub async fn update_fact(
        &self,
        fact_id: &str,
        content: &str,
        topics: &[String],
    ) -> Result<StoreOutcome> {
        let owner = self.store.identity().current().await?;
        let outcome = self.store.update(fact_id, content, topics).await?;
        if outcome.graph_write_queued {
            self.writes.enqueue(&owner, &outcome.fact_id);
        }
        Ok(outcome)
    }

    /// Queue every pending graph write of the active identity. Used at startup
    /// and after a switch.
    pub async fn resume_pending(&self) -> Result<usize> {
        let owner = self.store.identity().current().await?;
        let pending = self.store.pending_graph_writes().await?;
        for fact_id in &pending {
            self.writes.enqueue(&owner, fact_id);
        }
        if !pending.is_empty() {
            tracing::info!(owner = %owner, count = pending.len(), "resumed pending graph writes");
        }
        Ok(pending.len())
    }

    /// Facts whose graph write has not completed yet.
    pub async fn pending_graph_writes(&self) -> Result<Vec<String>> {
        self.store.pending_graph_writes().await
    }

    /// Wait for the graph-write queue to drain.
    pub async fn wait_idle(&self) {
        self.writes.wait_idle().await
    }

    pub async fn query_knowledge(
        &self,
        query: &str,
        mode: KnowledgeMode,
        limit: Option<usize>,
    ) -> Result<AnswerBundle> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CortexError::InvalidInput("query must not be empty".into()));
        }
        let mut bundle = AnswerBundle::new(query, mode);

        match mode {
            KnowledgeMode::Local => {
                let facts = self.store.query(query, limit).await?;
                bundle.attempts.push(self.local_attempt(&facts));
                if !facts.is_empty() {
                    bundle.answered_by = Some(Route::Local);
                }
                bundle.facts = facts;
                Ok(bundle)
            }
            KnowledgeMode::Graph(graph_mode) => {
                let answer = self.graph.query(&self.graph_query(query, graph_mode)).await?;
                let empty = answer.is_empty(&self.policy.graph_empty_markers);
                bundle.attempts.push(RouteAttempt {
                    route: Route::Graph,
                    outcome: graph_outcome(empty),
                });
                if !empty {
                    bundle.answered_by = Some(Route::Graph);
                    bundle.graph_answer = Some(answer);
                }
                Ok(bundle)
            }
            KnowledgeMode::Auto => self.query_auto(query, limit, bundle).await,
        }
    }

    /// Heuristic route, then one sequential fallback to the other store when the
    /// first is empty, weak, or down.
    async fn query_auto(
        &self,
        query: &str,
        limit: Option<usize>,
        mut bundle: AnswerBundle,
    ) -> Result<AnswerBundle> {
        let decision = self.policy.route(query, self.language.as_ref());
        tracing::debug!(query, route = ?decision.primary, reason = decision.reason, "auto routing");

        let mut errors: Vec<(Route, CortexError)> = Vec::new();
        let mut weak_local: Vec<ScoredFact> = Vec::new();

        for (i, route) in [decision.primary, decision.primary.other()].into_iter().enumerate() {
            if i > 0 {
                bundle.fallback_used = true;
            }
            match self.attempt(route, query, limit).await {
                Ok(Attempt::Local(facts)) => {
                    let attempt = self.local_attempt(&facts);
                    let strong = matches!(attempt.outcome, AttemptOutcome::Answered { .. });
                    bundle.attempts.push(attempt);
                    if strong {
                        bundle.answered_by = Some(Route::Local);
                        bundle.facts = facts;
                        break;
                    }
                    weak_local = facts;
                }
                Ok(Attempt::Graph(answer)) => {
                    let empty = answer.is_empty(&self.policy.graph_empty_markers);
                    bundle.attempts.push(RouteAttempt {
                        route,
                        outcome: graph_outcome(empty),
                    });
                    if empty {
                        continue;
                    }
                    bundle.answered_by = Some(Route::Graph);
                    bundle.graph_answer = Some(answer);
                    break;
                }
                Err(e) => {
                    bundle.attempts.push(RouteAttempt {
                        route,
                        outcome: AttemptOutcome::Failed { kind: e.kind(), message: e.to_string() },
                    });
                    errors.push((route, e));
                }
            }
        }

        if errors.len() == 2 {
            let message = |r: Route| {
                errors
                    .iter()
                    .find(|(route, _)| *route == r)
                    .map(|(_, e)| e.to_string())
                    .unwrap_or_default()
            };
            return Err(CortexError::KnowledgeUnavailable {
                local: message(Route::Local),
                graph: message(Route::Graph),
            });
        }

        // A weak local answer still beats nothing.
        if bundle.answered_by.is_none() && !weak_local.is_empty() {
            bundle.answered_by = Some(Route::Local);
            bundle.facts = weak_local;
        }

        // Without the embedder the local store cannot answer either.
        bundle.degraded = errors.iter().any(|(_, e)| {
            matches!(
                e,
                CortexError::GraphUnavailable(_)
                    | CortexError::StoreUnavailable(_)
                    | CortexError::Embedding(_)
            )
        });
        if bundle.degraded {
            tracing::warn!(
                query,
                failed = ?errors.iter().map(|(r, _)| *r).collect::<Vec<_>>(),
                "answering in degraded mode"
            );
        }
        Ok(bundle)
    }

    async fn attempt(&self, route: Route, query: &str, limit: Option<usize>) -> Result<Attempt> {
        match route {
            Route::Local => self.store.query(query, limit).await.map(Attempt::Local),
            Route::Graph => self
                .graph
                .query(&self.graph_query(query, AUTO_GRAPH_MODE))
                .await
                .map(Attempt::Graph),
        }
    }

    fn local_attempt(&self, facts: &[ScoredFact]) -> RouteAttempt {
        let top = facts.first().map(|f| f.score);
        let outcome = match top {
            None => AttemptOutcome::Empty,
            Some(score) if self.policy.is_low_confidence(Some(score)) => {
                AttemptOutcome::LowConfidence { top_score: score }
            }
            Some(_) => AttemptOutcome::Answered { hits: facts.len() },
        };
        RouteAttempt { route: Route::Local, outcome }
    }

    fn graph_query(&self, query: &str, mode: QueryMode) -> GraphQuery {
        GraphQuery {
            query: query.to_string(),
            mode,
            top_k: self.top_k,
            response_type: self.response_type.clone(),
        }
    }
}

/// A graph answer counts as one hit; the graph returns prose, not rows.
fn graph_outcome(empty: bool) -> AttemptOutcome {
    if empty {
        AttemptOutcome::Empty
    } else {
        AttemptOutcome::Answered { hits: 1 }
    }
}
