//! Divergence detection between the local store and the graph.
//!
//! A dual-sourced fact counts as present in the graph only when its own graph
//! write is recorded as `done` and the primary entity of its restated content is
//! a graph label. A label created by some other fact does not vouch for a write
//! that is still pending or has failed. Facts with no extractable entity were
//! uploaded as raw documents, so for those the `done` status alone decides.
//! Orphans are labels no active local fact mentions;
//! they are reported for manual review and never touched.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::coordinator::writer::{sync_fact, GraphProjector};
use crate::error::{CortexError, Result};
use crate::facts::{GraphWriteStatus, LocalFactStore};
use crate::graph::GraphStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    pub identity_id: String,
    pub missing_in_graph: Vec<String>,
    pub orphaned_in_graph: Vec<String>,
}

impl DivergenceReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_graph.is_empty() && self.orphaned_in_graph.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairFailure {
    pub fact_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairResult {
    pub repaired: Vec<String>,
    pub failed: Vec<RepairFailure>,
    /// Facts deleted or superseded since the report was taken.
    pub skipped: Vec<String>,
    pub orphans_left_for_review: Vec<String>,
}

pub struct ConsistencyAuditor {
    store: Arc<LocalFactStore>,
    graph: Arc<dyn GraphStore>,
    projector: Arc<GraphProjector>,
}

impl ConsistencyAuditor {
    pub fn new(
        store: Arc<LocalFactStore>,
        graph: Arc<dyn GraphStore>,
        projector: Arc<GraphProjector>,
    ) -> Self {
        Self { store, graph, projector }
    }

    /// Compare `identity_id`'s dual-sourced facts against the graph's labels.
    ///
    /// Read-only. Only the active identity can be audited.
    pub async fn audit(&self, identity_id: &str) -> Result<DivergenceReport> {
        let dual = self.store.list_both_sourced(identity_id).await?;
        let labels = self.graph.list_labels().await?;
        let known: BTreeSet<String> = labels.iter().map(|l| l.to_lowercase()).collect();

        let mut missing = Vec::new();
        for entry in &dual {
            let written = entry.graph_status == Some(GraphWriteStatus::Done);
            let present = written
                && self
                    .projector
                    .primary_entity(&entry.fact.content)
                    .map_or(true, |entity| known.contains(&entity.to_lowercase()));
            if !present {
                missing.push(entry.fact.fact_id.clone());
            }
        }
        missing.sort();

        let contents: Vec<String> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .map(|f| f.content.to_lowercase())
            .collect();
        let orphaned: Vec<String> = labels
            .into_iter()
            .filter(|label| {
                let needle = label.to_lowercase();
                !contents.iter().any(|c| c.contains(&needle))
            })
            .collect();

        tracing::info!(
            identity = %identity_id,
            checked = dual.len(),
            missing = missing.len(),
            orphaned = orphaned.len(),
            "consistency audit finished"
        );

        Ok(DivergenceReport {
            identity_id: identity_id.to_string(),
            missing_in_graph: missing,
            orphaned_in_graph: orphaned,
        })
    }

    /// Re-issue the graph write for every fact the report lists as missing.
    ///
    /// Entity writes are upserts keyed by name, so repairing twice never creates
    /// a second node. Orphans are passed through untouched.
    pub async fn repair(&self, report: &DivergenceReport) -> Result<RepairResult> {
        // Held for the whole pass so a switch cannot redirect half of a repair.
        let _lease = self.store.identity().lease(&report.identity_id).await?;

        let mut result = RepairResult {
            orphans_left_for_review: report.orphaned_in_graph.clone(),
            ..Default::default()
        };

        for fact_id in &report.missing_in_graph {
            let fact = match self.store.get(fact_id).await {
                Ok(fact) if fact.is_active() => fact,
                Ok(_) | Err(CortexError::NotFound(_)) => {
                    result.skipped.push(fact_id.clone());
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.store.requeue_graph_write(fact_id).await?;
            match sync_fact(&self.projector, &self.store, &report.identity_id, &fact).await? {
                Ok(_) => result.repaired.push(fact_id.clone()),
                Err(e) => result.failed.push(RepairFailure {
                    fact_id: fact_id.clone(),
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            identity = %report.identity_id,
            repaired = result.repaired.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "consistency repair finished"
        );
        Ok(result)
    }
}
