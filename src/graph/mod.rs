//! Remote knowledge-graph store.
//!
//! [`GraphStore`] is the seam the coordinator and auditor talk to;
//! [`GraphServiceClient`] implements it over the graph service's REST protocol.
//! Where the service lives is decided per call by an [`EndpointResolver`], so the
//! client never caches an identity's address across a switch.

pub mod client;
pub mod types;

pub use client::GraphServiceClient;
pub use types::{
    DocumentMetadata, EntityWrite, GraphAnswer, GraphQuery, QueryMode, RelationWrite,
    RelationWriteOutcome, WriteStatus,
};

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::Result;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn query(&self, query: &GraphQuery) -> Result<GraphAnswer>;

    async fn write_entity(&self, entity: &EntityWrite) -> Result<WriteStatus>;

    /// Write an edge. Missing endpoint entities are created first.
    async fn write_relation(&self, relation: &RelationWrite) -> Result<RelationWriteOutcome>;

    /// Upload raw text for the service to index. Returns the document id.
    async fn upload_document(&self, text: &str, metadata: &DocumentMetadata) -> Result<String>;

    /// All entity labels, sorted.
    async fn list_labels(&self) -> Result<BTreeSet<String>>;
}

/// Resolves the base URL of the graph service for the current call.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn base_url(&self) -> Result<String>;
}

/// A fixed address, for deployments that manage the service elsewhere.
pub struct StaticEndpoint(pub String);

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn base_url(&self) -> Result<String> {
        Ok(self.0.trim_end_matches('/').to_string())
    }
}
