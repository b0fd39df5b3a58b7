//! MCP `invoke_tool` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exactly one of `server` and `tag` selects the tool server.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InvokeToolParams {
    #[schemars(description = "Name of a configured tool server")]
    pub server: Option<String>,

    #[schemars(description = "Capability tag; the first server advertising it is used")]
    pub tag: Option<String>,

    #[schemars(description = "Tool to call on that server")]
    pub tool: String,

    #[schemars(description = "JSON object of tool arguments")]
    pub arguments: Option<serde_json::Value>,
}
