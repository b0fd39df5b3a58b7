//! Wiring of the coordination layer and the MCP stdio server.
//!
//! [`build_state`] assembles every component once; both transports and the admin
//! subcommands run on top of the same [`AppState`].

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;
use std::time::Duration;

use cortex::audit::ConsistencyAuditor;
use cortex::config::CortexConfig;
use cortex::coordinator::KnowledgeCoordinator;
use cortex::embedding::{self, EmbeddingProvider};
use cortex::facts::LocalFactStore;
use cortex::graph::{GraphServiceClient, GraphStore};
use cortex::identity::IdentityContext;
use cortex::language::{LanguageServices, RuleBasedLanguage};
use cortex::lifecycle::{LifecycleEndpoint, ServiceLifecycleManager};
use cortex::runner::{EphemeralToolRunner, McpConnector, ToolRegistry};

use crate::tools::CortexTools;

/// Every long-lived component, shared behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CortexConfig>,
    pub identity: Arc<IdentityContext>,
    pub lifecycle: Arc<ServiceLifecycleManager>,
    pub store: Arc<LocalFactStore>,
    pub coordinator: Arc<KnowledgeCoordinator>,
    pub auditor: Arc<ConsistencyAuditor>,
    pub runner: Arc<EphemeralToolRunner>,
}

/// Build the component graph. Must run inside the tokio runtime.
///
/// Order matters: the lifecycle manager exists before the identity context so
/// switches can drive it, and the graph client resolves its endpoint through both.
pub fn build_state(config: CortexConfig) -> Result<AppState> {
    let home = config.resolved_home();
    std::fs::create_dir_all(&home)
        .with_context(|| format!("failed to create home dir: {}", home.display()))?;

    let lifecycle = Arc::new(ServiceLifecycleManager::from_config(
        &home,
        &config.graph,
        &config.lifecycle,
    ));
    let identity = Arc::new(
        IdentityContext::bootstrap(&home, &config.storage.default_identity)
            .context("failed to open identity registry")?
            .with_hook(lifecycle.clone()),
    );
    tracing::info!(home = %home.display(), "identity context ready");

    let provider = embedding::create_provider(&config.embedding)?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(provider);
    tracing::info!(
        provider = %config.embedding.provider,
        model = %config.embedding.model,
        "embedding provider ready"
    );

    let store = Arc::new(
        LocalFactStore::new(identity.clone(), embedder).with_retrieval(&config.retrieval),
    );

    let endpoint = Arc::new(LifecycleEndpoint::new(lifecycle.clone(), identity.clone()));
    let graph: Arc<dyn GraphStore> = Arc::new(GraphServiceClient::new(&config.graph, endpoint)?);
    let language: Arc<dyn LanguageServices> = Arc::new(RuleBasedLanguage::new());

    let coordinator = Arc::new(KnowledgeCoordinator::new(
        store.clone(),
        graph.clone(),
        language,
        &config.graph,
        &config.routing,
    ));
    let auditor = Arc::new(ConsistencyAuditor::new(
        store.clone(),
        graph,
        coordinator.projector().clone(),
    ));

    let registry = ToolRegistry::from_config(&config.tools.servers)?;
    tracing::info!(servers = registry.list().count(), "tool registry loaded");
    let runner = Arc::new(EphemeralToolRunner::new(
        registry,
        Arc::new(McpConnector),
        Duration::from_secs(config.tools.call_timeout_secs),
    ));

    Ok(AppState {
        config: Arc::new(config),
        identity,
        lifecycle,
        store,
        coordinator,
        auditor,
        runner,
    })
}

/// Bring the active identity's graph service up if it is not already.
///
/// A failure is logged: local facts keep working and queries report degraded mode.
pub async fn ensure_graph_service(state: &AppState) {
    let current = match state.identity.current().await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "no active identity, graph service not started");
            return;
        }
    };
    match state.lifecycle.start(&current).await {
        Ok(instance) => tracing::info!(
            identity = %current,
            port = instance.host_port,
            "graph service ready"
        ),
        Err(e) => tracing::warn!(
            identity = %current,
            error = %e,
            "graph service unavailable, running degraded"
        ),
    }
}

/// Build the state, bring the graph service up and requeue unfinished graph writes.
async fn prepare(config: CortexConfig) -> Result<AppState> {
    let state = build_state(config)?;
    ensure_graph_service(&state).await;
    match state.coordinator.resume_pending().await {
        Ok(n) if n > 0 => tracing::info!(count = n, "requeued pending graph writes"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not resume pending graph writes"),
    }
    Ok(state)
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: CortexConfig) -> Result<()> {
    tracing::info!("starting cortex MCP server on stdio");

    let state = prepare(config).await?;
    let tools = CortexTools::new(state.clone());
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    state.coordinator.wait_idle().await;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over streamable HTTP at `/mcp`. Every session shares
/// one [`AppState`].
pub async fn serve_http(config: CortexConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting cortex MCP server on HTTP");

    let state = prepare(config).await?;
    let factory_state = state.clone();
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(CortexTools::new(factory_state.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    state.coordinator.wait_idle().await;
    Ok(())
}
