use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateFactParams {
    #[schemars(description = "ID of the fact to replace")]
    pub fact_id: String,

    #[schemars(description = "Corrected content. The fact gets a new ID and the old one is superseded.")]
    pub content: String,

    #[schemars(description = "Topic tags for the new version")]
    pub topics: Option<Vec<String>>,
}
