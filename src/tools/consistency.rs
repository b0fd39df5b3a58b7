//! MCP `audit_consistency` and `repair_consistency` tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AuditParams {
    #[schemars(description = "Identity to audit. Defaults to the active identity; any other identity is refused.")]
    pub identity_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RepairParams {
    #[schemars(description = "Identity to repair. Defaults to the active identity.")]
    pub identity_id: Option<String>,

    /// Only these facts; omit to repair everything a fresh audit reports missing.
    #[schemars(description = "Limit the repair to these fact IDs from a previous audit")]
    pub fact_ids: Option<Vec<String>>,
}
