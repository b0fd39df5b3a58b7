use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SwitchIdentityParams {
    #[schemars(
        description = "Registered identity to make active. Its graph service is started and the previous one stopped."
    )]
    pub identity_id: String,
}
