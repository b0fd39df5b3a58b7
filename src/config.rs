use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CortexConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub graph: GraphConfig,
    pub lifecycle: LifecycleConfig,
    pub routing: RoutingConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `stdio` or `http` (streamable HTTP at `/mcp`).
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the identity registry, the current-identity
    /// record, and one subdirectory per identity.
    pub home: String,
    /// Identity created on first run when the registry is empty.
    pub default_identity: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for two facts to be considered duplicates.
    pub dedup_threshold: f64,
    /// Minimum token-set Jaccard similarity of the normalized text.
    pub text_similarity_threshold: f64,
    /// Window used for `recent_count` in stats.
    pub recent_window_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub host: String,
    /// Port published on the host. External callers only ever use this one.
    pub host_port: u16,
    /// Fixed port the service listens on inside its container.
    pub container_port: u16,
    /// Per-identity host port overrides.
    pub port_overrides: BTreeMap<String, u16>,
    pub request_timeout_secs: u64,
    pub image: String,
    /// Optional path to a compose template. The built-in template is used when unset.
    pub compose_template: Option<String>,
    pub default_entity_type: String,
    pub top_k: usize,
    pub response_type: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    pub runtime_bin: String,
    pub health_path: String,
    pub health_timeout_secs: u64,
    pub health_poll_ms: u64,
    pub release_retries: u32,
    pub release_backoff_ms: u64,
    pub release_backoff_max_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    /// Queries with at most this many words go to the local store first.
    pub short_query_words: usize,
    /// Top local score below which a local answer counts as low-confidence.
    pub min_local_score: f64,
    /// Queries naming at least this many entities go to the graph first.
    pub multi_entity_threshold: usize,
    pub relational_terms: Vec<String>,
    pub factual_prefixes: Vec<String>,
    /// Substrings that mark a graph answer as "no context found".
    pub graph_empty_markers: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub call_timeout_secs: u64,
    pub servers: Vec<ToolServerConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home: default_cortex_dir().to_string_lossy().into_owned(),
            default_identity: "primary".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            url: "http://127.0.0.1:11434".into(),
            model: "all-minilm".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.8,
            text_similarity_threshold: 0.75,
            recent_window_hours: 24,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            host_port: 9621,
            container_port: 9621,
            port_overrides: BTreeMap::new(),
            request_timeout_secs: 30,
            image: "ghcr.io/hkuds/lightrag:latest".into(),
            compose_template: None,
            default_entity_type: "concept".into(),
            top_k: 40,
            response_type: "Multiple Paragraphs".into(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            runtime_bin: "docker".into(),
            health_path: "/health".into(),
            health_timeout_secs: 60,
            health_poll_ms: 500,
            release_retries: 8,
            release_backoff_ms: 250,
            release_backoff_max_ms: 4_000,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            short_query_words: 4,
            min_local_score: 0.35,
            multi_entity_threshold: 2,
            relational_terms: words(&[
                "related", "relationship", "between", "connected", "compare", "compared",
                "versus", "vs", "difference", "similar", "both", "knows", "works with",
                "married", "friend", "sibling", "parent", "child", "how are",
            ]),
            factual_prefixes: words(&[
                "what is", "when", "where is", "who is", "what's", "do i", "my ",
            ]),
            graph_empty_markers: words(&["[no-context]", "not able to provide an answer"]),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            servers: Vec::new(),
        }
    }
}

/// Returns `~/.cortex/`
pub fn default_cortex_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cortex")
}

/// Returns the default config file path: `~/.cortex/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cortex_dir().join("config.toml")
}

impl CortexConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CortexConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (CORTEX_HOME, CORTEX_TRANSPORT, CORTEX_LOG_LEVEL, CORTEX_GRAPH_HOST_PORT,
    /// CORTEX_EMBEDDING_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CORTEX_HOME") {
            self.storage.home = val;
        }
        if let Ok(val) = std::env::var("CORTEX_TRANSPORT") {
            self.server.transport = val;
        }
        if let Ok(val) = std::env::var("CORTEX_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CORTEX_GRAPH_HOST_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.graph.host_port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid CORTEX_GRAPH_HOST_PORT"),
            }
        }
        if let Ok(val) = std::env::var("CORTEX_EMBEDDING_URL") {
            self.embedding.url = val;
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.dedup_threshold),
            "retrieval.dedup_threshold must be within [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.text_similarity_threshold),
            "retrieval.text_similarity_threshold must be within [0, 1]"
        );
        anyhow::ensure!(
            matches!(self.server.transport.as_str(), "stdio" | "http"),
            "server.transport must be \"stdio\" or \"http\", got {:?}",
            self.server.transport
        );
        anyhow::ensure!(self.graph.host_port != 0, "graph.host_port must be non-zero");
        let mut seen = std::collections::HashSet::new();
        for server in &self.tools.servers {
            anyhow::ensure!(
                seen.insert(server.name.as_str()),
                "duplicate tool server name: {}",
                server.name
            );
        }
        Ok(())
    }

    /// Resolve the home directory, expanding `~` if needed.
    pub fn resolved_home(&self) -> PathBuf {
        expand_tilde(&self.storage.home)
    }

    /// Host port the given identity's graph service publishes.
    pub fn host_port_for(&self, identity_id: &str) -> u16 {
        self.graph.host_port_for(identity_id)
    }
}

impl GraphConfig {
    pub fn host_port_for(&self, identity_id: &str) -> u16 {
        self.port_overrides
            .get(identity_id)
            .copied()
            .unwrap_or(self.host_port)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
