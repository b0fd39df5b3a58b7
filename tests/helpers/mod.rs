#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use cortex::audit::ConsistencyAuditor;
use cortex::config::{GraphConfig, LifecycleConfig, RoutingConfig};
use cortex::coordinator::KnowledgeCoordinator;
use cortex::db;
use cortex::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use cortex::error::{CortexError, Result};
use cortex::facts::LocalFactStore;
use cortex::graph::{
    DocumentMetadata, EntityWrite, GraphAnswer, GraphQuery, GraphStore, RelationWrite,
    RelationWriteOutcome, WriteStatus,
};
use cortex::identity::{Identity, IdentityContext, Role};
use cortex::language::RuleBasedLanguage;
use cortex::lifecycle::{ContainerRuntime, HealthProbe, PortProbe, ServiceLifecycleManager};
use rusqlite::Connection;
use tempfile::TempDir;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::load_sqlite_vec();
    let mut conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&mut conn).unwrap();
    conn
}

/// Unit vector with a spike at `dim`. Distinct dims are orthogonal.
pub fn spike(dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[dim % EMBEDDING_DIM] = 1.0;
    v
}

/// Unit vector with cosine `cos` to `spike(a)`, the remainder along `b`.
pub fn blend(a: usize, b: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[a % EMBEDDING_DIM] = cos;
    v[b % EMBEDDING_DIM] = (1.0 - cos * cos).sqrt();
    v
}

/// Embeds registered texts to chosen vectors and anything else to a spike
/// picked by hashing the lowercased text.
#[derive(Default)]
pub struct TextEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl TextEmbedder {
    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.trim().to_lowercase(), vector);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail every call as if the embedding server were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for TextEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CortexError::Embedding("connection refused".into()));
        }
        let key = text.trim().to_lowercase();
        if let Some(v) = self.vectors.lock().unwrap().get(&key) {
            return Ok(v.clone());
        }
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        Ok(spike(100 + (h.finish() % 200) as usize))
    }
}

/// In-memory graph store. Entities are keyed by name, so writes are upserts.
#[derive(Default)]
pub struct FakeGraph {
    pub labels: Mutex<BTreeSet<String>>,
    pub documents: Mutex<Vec<String>>,
    pub queries: Mutex<Vec<GraphQuery>>,
    pub answer: Mutex<String>,
    /// Every call fails as if the service were down.
    pub unavailable: AtomicBool,
    /// Writes fail as if the service were down; reads still work.
    pub fail_writes: AtomicBool,
    pub entity_creations: AtomicUsize,
    /// Writes park here until `release_writes`, leaving the job in flight.
    held: AtomicBool,
    released: Notify,
}

impl FakeGraph {
    pub fn answering(answer: &str) -> Self {
        let graph = Self::default();
        *graph.answer.lock().unwrap() = answer.to_string();
        graph
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn labels(&self) -> BTreeSet<String> {
        self.labels.lock().unwrap().clone()
    }

    pub fn hold_writes(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_writes(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_if_held(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    fn check(&self, write: bool) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst)
            || (write && self.fail_writes.load(Ordering::SeqCst))
        {
            return Err(CortexError::GraphUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn upsert(&self, name: &str) -> WriteStatus {
        if self.labels.lock().unwrap().insert(name.to_string()) {
            self.entity_creations.fetch_add(1, Ordering::SeqCst);
            WriteStatus::Created
        } else {
            WriteStatus::Ok
        }
    }
}

#[async_trait]
impl GraphStore for FakeGraph {
    async fn query(&self, query: &GraphQuery) -> Result<GraphAnswer> {
        self.check(false)?;
        self.queries.lock().unwrap().push(query.clone());
        Ok(GraphAnswer {
            response: self.answer.lock().unwrap().clone(),
            mode: Some(query.mode),
        })
    }

    async fn write_entity(&self, entity: &EntityWrite) -> Result<WriteStatus> {
        self.wait_if_held().await;
        self.check(true)?;
        Ok(self.upsert(&entity.entity_name))
    }

    async fn write_relation(&self, relation: &RelationWrite) -> Result<RelationWriteOutcome> {
        self.wait_if_held().await;
        self.check(true)?;
        let mut synthesized = Vec::new();
        for end in [&relation.subject, &relation.object] {
            if self.upsert(end) == WriteStatus::Created {
                synthesized.push(end.clone());
            }
        }
        Ok(RelationWriteOutcome {
            status: WriteStatus::Created,
            synthesized,
        })
    }

    async fn upload_document(&self, text: &str, _metadata: &DocumentMetadata) -> Result<String> {
        self.wait_if_held().await;
        self.check(true)?;
        let mut docs = self.documents.lock().unwrap();
        docs.push(text.to_string());
        Ok(format!("doc-{}", docs.len()))
    }

    async fn list_labels(&self) -> Result<BTreeSet<String>> {
        self.check(false)?;
        Ok(self.labels())
    }
}

/// A temp home with identities `charlie` (active) and `bot` registered.
pub fn temp_identity() -> (TempDir, IdentityContext) {
    let tmp = TempDir::new().unwrap();
    let ctx = IdentityContext::bootstrap(tmp.path(), "charlie").unwrap();
    ctx.registry()
        .register(Identity::new("bot", "Bot", Role::Bot))
        .unwrap();
    (tmp, ctx)
}

/// Every coordination component over fakes. Must be built inside a tokio runtime.
pub struct Harness {
    pub tmp: TempDir,
    pub identity: Arc<IdentityContext>,
    pub embedder: Arc<TextEmbedder>,
    pub graph: Arc<FakeGraph>,
    pub store: Arc<LocalFactStore>,
    pub coordinator: KnowledgeCoordinator,
    pub auditor: ConsistencyAuditor,
}

pub fn harness() -> Harness {
    harness_with(FakeGraph::default())
}

pub fn harness_with(graph: FakeGraph) -> Harness {
    let (tmp, ctx) = temp_identity();
    let identity = Arc::new(ctx);
    let embedder = Arc::new(TextEmbedder::default());
    let graph = Arc::new(graph);
    let store = Arc::new(LocalFactStore::new(identity.clone(), embedder.clone()));
    let coordinator = KnowledgeCoordinator::new(
        store.clone(),
        graph.clone(),
        Arc::new(RuleBasedLanguage::new()),
        &GraphConfig::default(),
        &RoutingConfig::default(),
    );
    let projector = coordinator.projector().clone();
    let auditor = ConsistencyAuditor::new(store.clone(), graph.clone(), projector);
    Harness {
        tmp,
        identity,
        embedder,
        graph,
        store,
        coordinator,
        auditor,
    }
}

/// Container world shared by the fake runtime and probes. A project's port is
/// bound exactly while it is up.
#[derive(Default)]
pub struct FakeContainers {
    pub up: Mutex<HashMap<String, u16>>,
    pub calls: Mutex<Vec<String>>,
    pub unhealthy_projects: Mutex<BTreeSet<String>>,
    pub double_binds: AtomicUsize,
}

impl FakeContainers {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn port_of(compose_file: &Path) -> u16 {
        std::fs::read_to_string(compose_file.with_file_name(".env"))
            .ok()
            .and_then(|env| {
                env.lines()
                    .find_map(|l| l.strip_prefix("HOST_PORT="))
                    .and_then(|p| p.parse().ok())
            })
            .unwrap_or(0)
    }
}

pub struct FakeRuntime(pub Arc<FakeContainers>);

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(&self, project: &str, compose_file: &Path) -> Result<Option<String>> {
        let port = FakeContainers::port_of(compose_file);
        let mut up = self.0.up.lock().unwrap();
        if up.values().any(|p| *p == port) {
            self.0.double_binds.fetch_add(1, Ordering::SeqCst);
        }
        up.insert(project.to_string(), port);
        self.0.calls.lock().unwrap().push(format!("up:{project}"));
        Ok(Some(format!("ctr-{project}")))
    }

    async fn down(&self, project: &str, _compose_file: &Path) -> Result<()> {
        self.0.up.lock().unwrap().remove(project);
        self.0.calls.lock().unwrap().push(format!("down:{project}"));
        Ok(())
    }

    async fn is_running(&self, project: &str, _compose_file: &Path) -> Result<bool> {
        Ok(self.0.up.lock().unwrap().contains_key(project))
    }
}

pub struct FakePorts(pub Arc<FakeContainers>);

#[async_trait]
impl PortProbe for FakePorts {
    async fn is_bound(&self, _host: &str, port: u16) -> bool {
        self.0.up.lock().unwrap().values().any(|p| *p == port)
    }
}

/// Healthy unless the project bound to the URL's port is marked unhealthy.
pub struct FakeHealth(pub Arc<FakeContainers>);

#[async_trait]
impl HealthProbe for FakeHealth {
    async fn is_healthy(&self, url: &str) -> bool {
        let up = self.0.up.lock().unwrap();
        let unhealthy = self.0.unhealthy_projects.lock().unwrap();
        !up.iter().any(|(project, port)| {
            url.contains(&format!(":{port}/")) && unhealthy.contains(project)
        })
    }
}

pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        health_timeout_secs: 1,
        health_poll_ms: 10,
        release_retries: 3,
        release_backoff_ms: 5,
        release_backoff_max_ms: 20,
        ..Default::default()
    }
}

pub fn fake_lifecycle(home: &Path, containers: &Arc<FakeContainers>) -> ServiceLifecycleManager {
    ServiceLifecycleManager::new(
        home,
        GraphConfig::default(),
        fast_lifecycle(),
        Arc::new(FakeRuntime(containers.clone())),
        Arc::new(FakePorts(containers.clone())),
        Arc::new(FakeHealth(containers.clone())),
    )
}
