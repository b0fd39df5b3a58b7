use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreFactParams {
    #[schemars(description = "The fact to remember, as a short natural language statement")]
    pub content: String,

    #[schemars(description = "Topic tags used for grouping and bulk deletion")]
    pub topics: Option<Vec<String>>,

    #[schemars(
        description = "Also project the fact into the knowledge graph (default: true). The graph write is queued and does not delay the response."
    )]
    pub dual: Option<bool>,
}
