//! Knowledge coordination for a personal assistant: one identity at a time,
//! two independently operated stores, and the plumbing that keeps them honest.
//!
//! Cortex sits between an assistant and its durable knowledge. Facts land in a
//! fast per-identity local store and are projected asynchronously into a
//! relationship-aware graph service that runs as a container per identity.
//!
//! | Store | Strength | Answers |
//! |-------|----------|---------|
//! | **Local facts** | Fast, exact, deduplicated | Short and factual questions |
//! | **Graph service** | Multi-hop, relational | "How is X related to Y" |
//!
//! # Architecture
//!
//! - **Identity**: a single on-disk record of the active identity, re-read on every
//!   call and switched atomically through [`identity::IdentityContext`]
//! - **Local store**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine search, one database file per identity
//! - **Graph**: a LightRAG-style REST service reached on its host port
//! - **Lifecycle**: an explicit state machine over `docker compose`, serialized per
//!   host port
//! - **Tools**: external MCP servers invoked in throwaway sessions
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`identity`]: Active identity, registry, and per-identity paths
//! - [`db`]: SQLite initialization, schema, and migrations
//! - [`embedding`]: Text-to-vector embedding over HTTP
//! - [`facts`]: The local fact store
//! - [`graph`]: Graph service client and wire types
//! - [`language`]: Restatement and entity/relation extraction
//! - [`lifecycle`]: Graph service lifecycle
//! - [`coordinator`]: Dual writes and routed queries
//! - [`audit`]: Divergence detection and repair
//! - [`runner`]: Ephemeral tool invocations

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod facts;
pub mod graph;
pub mod identity;
pub mod language;
pub mod lifecycle;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_http;
