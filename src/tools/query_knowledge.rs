//! MCP `query_knowledge` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `query_knowledge` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryKnowledgeParams {
    #[schemars(description = "Natural language question")]
    pub query: String,

    /// `auto`, `local`, a graph mode, or `graph:<mode>`.
    #[schemars(
        description = "Routing mode: 'auto' (default, heuristic with one fallback), 'local' (local facts only), or a graph mode: 'global', 'hybrid', 'naive', 'mix', 'bypass', 'graph:local'"
    )]
    pub mode: Option<String>,

    #[schemars(description = "Maximum number of local facts to return. Omit for all matches.")]
    pub limit: Option<usize>,
}
