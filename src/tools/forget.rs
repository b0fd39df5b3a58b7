//! MCP `forget_fact` and `forget_topics` tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetFactParams {
    #[schemars(description = "ID of the fact to delete")]
    pub fact_id: String,
}

/// Deleting by topic is bulk, so it is gated behind `confirm`.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetTopicsParams {
    #[schemars(description = "Delete every fact tagged with any of these topics")]
    pub topics: Vec<String>,

    #[schemars(description = "Must be true; guards against accidental bulk deletion")]
    pub confirm: bool,
}
