//! Local fact store: structured and vector CRUD over atomic facts.
//!
//! The submodules hold synchronous operations over a [`rusqlite::Connection`].
//! [`LocalFactStore`] is the async facade used by the rest of the crate: every call
//! resolves the active identity fresh, opens that identity's database, and runs the
//! operation on the blocking pool. Writes for one identity are serialized.

pub mod forget;
pub mod search;
pub mod stats;
pub mod store;
pub mod sync;
pub mod types;

pub use store::DedupPolicy;
pub use types::{
    normalize_topics, DualFact, Fact, FactSource, FactStats, GraphWriteStatus, ScoredFact,
    StoreOutcome,
};

use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::{CortexError, Result};
use crate::identity::{IdentityContext, IdentityPaths};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            std::mem::size_of_val(embedding),
        )
    }
}

/// Inverse of [`embedding_to_bytes`] for blobs read back from `facts_vec`.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub struct LocalFactStore {
    identity: Arc<IdentityContext>,
    embedder: Arc<dyn EmbeddingProvider>,
    policy: DedupPolicy,
    recent_window: chrono::Duration,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalFactStore {
    pub fn new(identity: Arc<IdentityContext>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            identity,
            embedder,
            policy: DedupPolicy::default(),
            recent_window: chrono::Duration::hours(24),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retrieval(mut self, config: &crate::config::RetrievalConfig) -> Self {
        self.policy = DedupPolicy::from(config);
        self.recent_window = chrono::Duration::hours(config.recent_window_hours);
        self
    }

    pub fn identity(&self) -> &Arc<IdentityContext> {
        &self.identity
    }

    /// Store a local-only fact.
    pub async fn store(&self, content: &str, topics: &[String]) -> Result<StoreOutcome> {
        self.store_with_source(content, topics, FactSource::Local).await
    }

    /// Store a fact, or return the id of an existing duplicate.
    pub async fn store_with_source(
        &self,
        content: &str,
        topics: &[String],
        source: FactSource,
    ) -> Result<StoreOutcome> {
        let content = validate_content(content)?;
        let topics = normalize_topics(topics);
        let embedding = self.embed(&content).await?;
        let policy = self.policy;

        self.write(move |conn, owner| {
            store::store_fact(conn, owner, &content, &topics, source, &embedding, policy)
        })
        .await
    }

    /// Active facts ranked by similarity to `text`. `limit = None` returns all.
    pub async fn query(&self, text: &str, limit: Option<usize>) -> Result<Vec<ScoredFact>> {
        let embedding = self.embed(text).await?;
        self.read(move |conn, owner| search::query_facts(conn, owner, &embedding, limit))
            .await
    }

    /// Replace a fact with new content under a new id.
    pub async fn update(
        &self,
        fact_id: &str,
        content: &str,
        topics: &[String],
    ) -> Result<StoreOutcome> {
        let content = validate_content(content)?;
        let topics = normalize_topics(topics);
        let embedding = self.embed(&content).await?;
        let fact_id = fact_id.to_string();

        self.write(move |conn, owner| {
            store::update_fact(conn, owner, &fact_id, &content, &topics, &embedding)
        })
        .await
    }

    pub async fn delete(&self, fact_id: &str) -> Result<()> {
        let fact_id = fact_id.to_string();
        self.write(move |conn, owner| forget::delete_fact(conn, owner, &fact_id))
            .await
    }

    /// Delete every fact tagged with any of `topics`. Returns the number removed.
    pub async fn delete_by_topics(&self, topics: &[String]) -> Result<usize> {
        let topics: BTreeSet<String> = normalize_topics(topics);
        self.write(move |conn, owner| forget::delete_by_topics(conn, owner, &topics))
            .await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.write(|conn, owner| forget::clear(conn, owner)).await
    }

    pub async fn stats(&self) -> Result<FactStats> {
        let window = self.recent_window;
        self.read(move |conn, owner| stats::fact_stats(conn, owner, window))
            .await
    }

    pub async fn get(&self, fact_id: &str) -> Result<Fact> {
        let fact_id = fact_id.to_string();
        self.read(move |conn, owner| search::get_fact(conn, owner, &fact_id))
            .await
    }

    /// Active dual-sourced facts of `owner_id`, which must be the active identity.
    pub async fn list_both_sourced(&self, owner_id: &str) -> Result<Vec<DualFact>> {
        self.identity.require_active(owner_id).await?;
        self.read(|conn, owner| search::list_both_sourced(conn, owner))
            .await
    }

    /// All active facts of the current identity, oldest first.
    pub async fn list_active(&self) -> Result<Vec<Fact>> {
        self.read(|conn, owner| search::list_active(conn, owner)).await
    }

    pub async fn pending_graph_writes(&self) -> Result<Vec<String>> {
        self.read(|conn, owner| sync::pending(conn, owner)).await
    }

    /// Record a finished graph write for a fact owned by `owner_id`.
    ///
    /// Takes the owner explicitly so a write that completes after a switch is
    /// still recorded against the identity it belongs to.
    pub async fn mark_graph_done(&self, owner_id: &str, fact_id: &str) -> Result<()> {
        let fact_id = fact_id.to_string();
        self.write_for(owner_id, move |conn, owner| sync::mark_done(conn, owner, &fact_id))
            .await
    }

    pub async fn mark_graph_failed(
        &self,
        owner_id: &str,
        fact_id: &str,
        error: &str,
    ) -> Result<()> {
        let fact_id = fact_id.to_string();
        let error = error.to_string();
        self.write_for(owner_id, move |conn, owner| {
            sync::mark_failed(conn, owner, &fact_id, &error)
        })
        .await
    }

    /// Queue a graph write again for an active fact of the current identity.
    pub async fn requeue_graph_write(&self, fact_id: &str) -> Result<()> {
        let fact_id = fact_id.to_string();
        self.write(move |conn, owner| sync::requeue(conn, owner, &fact_id))
            .await
    }

    pub async fn graph_write_status(&self, fact_id: &str) -> Result<Option<GraphWriteStatus>> {
        let fact_id = fact_id.to_string();
        self.read(move |conn, _| sync::status(conn, &fact_id)).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(text).await?;
        crate::embedding::check_dimensions(&embedding)?;
        Ok(embedding)
    }

    async fn read<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let owner = self.identity.current().await?;
        let db = IdentityPaths::resolve(self.identity.home(), &owner).facts_db;
        run_blocking(db, move |conn| op(conn, &owner)).await
    }

    async fn write<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let owner = self.identity.current().await?;
        self.locked_write(owner, op).await
    }

    async fn write_for<T, F>(&self, owner_id: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        self.locked_write(owner_id.to_string(), op).await
    }

    async fn locked_write<T, F>(&self, owner: String, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let lock = {
            let mut writers = self.writers.lock().await;
            writers.entry(owner.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;
        let db = IdentityPaths::resolve(self.identity.home(), &owner).facts_db;
        run_blocking(db, move |conn| op(conn, &owner)).await
    }
}

fn validate_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(CortexError::InvalidInput("fact content must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

async fn run_blocking<T, F>(db: PathBuf, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = crate::db::open_database(&db)?;
        op(&mut conn)
    })
    .await
    .map_err(|e| CortexError::StoreUnavailable(format!("store task failed: {e}")))?
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::embedding::EMBEDDING_DIM;

    /// Unit vector along dimension `dim`.
    pub fn spike(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[dim % EMBEDDING_DIM] = 1.0;
        v
    }

    /// Close to `spike(dim)` (cosine ~0.997).
    pub fn near(dim: usize) -> Vec<f32> {
        blend(dim, dim + 1, 0.997)
    }

    /// Unit vector with cosine `cos` to `spike(a)` and the remainder along `b`.
    pub fn blend(a: usize, b: usize, cos: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[a % EMBEDDING_DIM] = cos;
        v[b % EMBEDDING_DIM] = (1.0 - cos * cos).sqrt();
        v
    }
}
