//! Error taxonomy for the coordination layer.
//!
//! Every component returns [`CortexError`]. The variants map one-to-one onto the
//! recovery classes callers care about: local misses, retryable backend outages,
//! non-retryable rejections, contention, and request-scoped total failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    /// Local lookup miss. Recoverable; the caller decides what to do.
    #[error("not found: {0}")]
    NotFound(String),

    /// The local fact index could not be opened or written.
    #[error("local fact store unavailable: {0}")]
    StoreUnavailable(String),

    /// Network failure or timeout talking to the graph service. Retryable.
    #[error("graph service unavailable: {0}")]
    GraphUnavailable(String),

    /// The graph service refused the request (4xx). Not retryable.
    #[error("graph service rejected request ({status}): {body}")]
    GraphRejected { status: u16, body: String },

    /// A host port is held by another live instance.
    #[error("host port {port} is held by {holder}")]
    PortConflict { port: u16, holder: String },

    /// Another identity switch is still running.
    #[error("an identity switch is already in progress")]
    SwitchInProgress,

    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// An operation targeted an identity other than the active one.
    #[error("identity {requested} is not the active identity ({active})")]
    CrossIdentityAccess { requested: String, active: String },

    /// A service instance ended up in the `failed` state.
    #[error("service lifecycle failed for {identity}: {reason}")]
    LifecycleFailed { identity: String, reason: String },

    /// Tool transport failed twice (initial attempt plus one fresh-session retry).
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Neither store could answer. Fatal for the request only.
    #[error("knowledge unavailable (local: {local}; graph: {graph})")]
    KnowledgeUnavailable { local: String, graph: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Restatement or extraction failed; callers fall back to raw text.
    #[error("language processing failed: {0}")]
    Language(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CortexError>;

impl CortexError {
    /// Whether retrying the same request later can succeed without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::GraphUnavailable(_)
                | Self::PortConflict { .. }
                | Self::SwitchInProgress
                | Self::ToolUnavailable(_)
        )
    }

    /// Short machine-readable kind, used in tool responses and attempt logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::GraphUnavailable(_) => "graph_unavailable",
            Self::GraphRejected { .. } => "graph_rejected",
            Self::PortConflict { .. } => "port_conflict",
            Self::SwitchInProgress => "switch_in_progress",
            Self::UnknownIdentity(_) => "unknown_identity",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::CrossIdentityAccess { .. } => "cross_identity_access",
            Self::LifecycleFailed { .. } => "lifecycle_failed",
            Self::ToolUnavailable(_) => "tool_unavailable",
            Self::KnowledgeUnavailable { .. } => "knowledge_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::Embedding(_) => "embedding",
            Self::Language(_) => "language",
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CortexError::GraphUnavailable("timeout".into()).is_retryable());
        assert!(CortexError::SwitchInProgress.is_retryable());
        assert!(!CortexError::GraphRejected {
            status: 422,
            body: "bad".into()
        }
        .is_retryable());
        assert!(!CortexError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn rejected_message_is_verbatim() {
        let err = CortexError::GraphRejected {
            status: 400,
            body: "entity_name is required".into(),
        };
        assert!(err.to_string().contains("entity_name is required"));
        assert_eq!(err.kind(), "graph_rejected");
    }
}
