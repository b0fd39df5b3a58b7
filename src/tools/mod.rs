pub mod consistency;
pub mod forget;
pub mod identity;
pub mod invoke_tool;
pub mod query_knowledge;
pub mod store_fact;
pub mod update_fact;

use consistency::{AuditParams, RepairParams};
use forget::{ForgetFactParams, ForgetTopicsParams};
use identity::SwitchIdentityParams;
use invoke_tool::InvokeToolParams;
use query_knowledge::QueryKnowledgeParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde::Serialize;
use store_fact::StoreFactParams;
use update_fact::UpdateFactParams;

use cortex::coordinator::KnowledgeMode;
use cortex::error::CortexError;

use crate::server::AppState;

/// The cortex MCP tool handler. Holds the shared component graph and exposes
/// the coordination operations via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct CortexTools {
    tool_router: ToolRouter<Self>,
    state: AppState,
}

/// Errors go back to the client as JSON with a machine-readable kind.
fn tool_error(e: CortexError) -> String {
    serde_json::json!({
        "error": e.kind(),
        "message": e.to_string(),
        "retryable": e.is_retryable(),
    })
    .to_string()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

#[tool_router]
impl CortexTools {
    pub fn new(state: AppState) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state,
        }
    }

    #[tool(description = "Remember a fact for the active identity. Near-duplicates return the existing fact ID instead of a new row. With dual=true (default) the fact is also queued for the knowledge graph.")]
    async fn store_fact(
        &self,
        Parameters(params): Parameters<StoreFactParams>,
    ) -> Result<String, String> {
        let topics = params.topics.unwrap_or_default();
        let dual = params.dual.unwrap_or(true);
        tracing::info!(content_len = params.content.len(), dual, "store_fact called");

        let outcome = self
            .state
            .coordinator
            .store_fact(&params.content, &topics, dual)
            .await
            .map_err(tool_error)?;
        to_json(&outcome)
    }

    #[tool(description = "Answer a question from stored knowledge. 'auto' picks the local fact store or the knowledge graph from the question's shape and falls back to the other once. The response says which store answered and whether it ran degraded.")]
    async fn query_knowledge(
        &self,
        Parameters(params): Parameters<QueryKnowledgeParams>,
    ) -> Result<String, String> {
        let mode: KnowledgeMode = params.mode.as_deref().unwrap_or("auto").parse()?;
        tracing::info!(query = %params.query, mode = %mode, "query_knowledge called");

        let bundle = self
            .state
            .coordinator
            .query_knowledge(&params.query, mode, params.limit)
            .await
            .map_err(tool_error)?;
        to_json(&bundle)
    }

    #[tool(description = "Correct a fact. The replacement gets a new ID; the old ID is superseded and no longer returned by queries.")]
    async fn update_fact(
        &self,
        Parameters(params): Parameters<UpdateFactParams>,
    ) -> Result<String, String> {
        let topics = params.topics.unwrap_or_default();
        let outcome = self
            .state
            .coordinator
            .update_fact(&params.fact_id, &params.content, &topics)
            .await
            .map_err(tool_error)?;
        tracing::info!(old = %params.fact_id, new = %outcome.fact_id, "fact updated");
        to_json(&outcome)
    }

    #[tool(description = "Delete a single fact by ID.")]
    async fn forget_fact(
        &self,
        Parameters(params): Parameters<ForgetFactParams>,
    ) -> Result<String, String> {
        self.state
            .store
            .delete(&params.fact_id)
            .await
            .map_err(tool_error)?;
        Ok(serde_json::json!({ "deleted": params.fact_id }).to_string())
    }

    #[tool(description = "Delete every fact tagged with any of the given topics. Facts with other topics are untouched. Requires confirm=true.")]
    async fn forget_topics(
        &self,
        Parameters(params): Parameters<ForgetTopicsParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("forget_topics requires confirm=true".into());
        }
        let deleted = self
            .state
            .store
            .delete_by_topics(&params.topics)
            .await
            .map_err(tool_error)?;
        Ok(serde_json::json!({ "deleted": deleted, "topics": params.topics }).to_string())
    }

    #[tool(description = "Statistics for the active identity's fact store: counts, topic histogram, recent facts, pending graph writes.")]
    async fn fact_stats(&self) -> Result<String, String> {
        let stats = self.state.store.stats().await.map_err(tool_error)?;
        to_json(&stats)
    }

    #[tool(description = "Show the active identity.")]
    async fn current_identity(&self) -> Result<String, String> {
        let identity = self
            .state
            .identity
            .current_identity()
            .await
            .map_err(tool_error)?;
        let service = self.state.lifecycle.status(&identity.id).await;
        Ok(serde_json::json!({ "identity": identity, "graph_service": service }).to_string())
    }

    #[tool(description = "Switch the active identity. Stops the previous identity's graph service and starts the target's; on failure nothing changes.")]
    async fn switch_identity(
        &self,
        Parameters(params): Parameters<SwitchIdentityParams>,
    ) -> Result<String, String> {
        let outcome = self
            .state
            .identity
            .switch(&params.identity_id)
            .await
            .map_err(tool_error)?;
        if let Err(e) = self.state.coordinator.resume_pending().await {
            tracing::warn!(error = %e, "could not resume pending graph writes after switch");
        }
        to_json(&outcome)
    }

    #[tool(description = "Compare the active identity's dual-written facts with the knowledge graph. Reports facts missing from the graph and graph entities with no local fact. Read-only.")]
    async fn audit_consistency(
        &self,
        Parameters(params): Parameters<AuditParams>,
    ) -> Result<String, String> {
        let identity = self.identity_or_current(params.identity_id).await?;
        let report = self.state.auditor.audit(&identity).await.map_err(tool_error)?;
        to_json(&report)
    }

    #[tool(description = "Re-issue graph writes for facts missing from the graph. Orphaned graph entities are reported for review, never deleted.")]
    async fn repair_consistency(
        &self,
        Parameters(params): Parameters<RepairParams>,
    ) -> Result<String, String> {
        let identity = self.identity_or_current(params.identity_id).await?;
        let mut report = self.state.auditor.audit(&identity).await.map_err(tool_error)?;
        if let Some(only) = params.fact_ids {
            report.missing_in_graph.retain(|id| only.contains(id));
        }
        let result = self.state.auditor.repair(&report).await.map_err(tool_error)?;
        to_json(&result)
    }

    #[tool(description = "Call a tool on a configured external tool server in a fresh, isolated session. Select the server by name or by capability tag.")]
    async fn invoke_tool(
        &self,
        Parameters(params): Parameters<InvokeToolParams>,
    ) -> Result<String, String> {
        let arguments = params.arguments.unwrap_or(serde_json::Value::Null);
        let runner = &self.state.runner;
        let outcome = match (params.server.as_deref(), params.tag.as_deref()) {
            (Some(server), None) => runner.invoke_named(server, &params.tool, arguments).await,
            (None, Some(tag)) => runner.invoke_by_tag(tag, &params.tool, arguments).await,
            _ => return Err("exactly one of 'server' or 'tag' is required".into()),
        }
        .map_err(tool_error)?;
        to_json(&outcome)
    }
}

impl CortexTools {
    async fn identity_or_current(&self, requested: Option<String>) -> Result<String, String> {
        match requested {
            Some(id) => Ok(id),
            None => self.state.identity.current().await.map_err(tool_error),
        }
    }
}

#[tool_handler]
impl ServerHandler for CortexTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Cortex coordinates an assistant's knowledge across a local fact store and a \
                 knowledge graph for the active identity. Use store_fact to remember, \
                 query_knowledge to ask, and audit_consistency to check the two stores agree."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
