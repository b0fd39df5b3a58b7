//! Port-safe lifecycle of the per-identity graph service.
//!
//! [`ServiceLifecycleManager`] drives an explicit state machine per
//! [`InstanceKey`]. All transitions touching a host port hold that port's lock, so
//! a start queued behind a stop only runs once the stop has confirmed the port is
//! released, and no two instances ever bind the same host port.
//!
//! External callers only ever see the host port; the container port is fixed and
//! internal to the compose definition.

pub mod compose;
pub mod probe;
pub mod runtime;
pub mod state;

pub use probe::{HealthProbe, HttpHealthProbe, LocalPortProbe, PortProbe};
pub use runtime::{ContainerRuntime, DockerCompose};
pub use state::{InstanceKey, ServiceInstance, ServiceKind, ServiceState};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{GraphConfig, LifecycleConfig};
use crate::error::{CortexError, Result};
use crate::graph::EndpointResolver;
use crate::identity::{IdentityContext, IdentityPaths, SwitchHook};

pub struct ServiceLifecycleManager {
    home: PathBuf,
    graph: GraphConfig,
    config: LifecycleConfig,
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<dyn PortProbe>,
    health: Arc<dyn HealthProbe>,
    instances: Mutex<BTreeMap<InstanceKey, ServiceInstance>>,
    port_locks: Mutex<HashMap<u16, Arc<Mutex<()>>>>,
}

impl ServiceLifecycleManager {
    pub fn new(
        home: impl Into<PathBuf>,
        graph: GraphConfig,
        config: LifecycleConfig,
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<dyn PortProbe>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            home: home.into(),
            graph,
            config,
            runtime,
            ports,
            health,
            instances: Mutex::new(BTreeMap::new()),
            port_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager wired to the real container runtime and probes.
    pub fn from_config(
        home: impl Into<PathBuf>,
        graph: &GraphConfig,
        config: &LifecycleConfig,
    ) -> Self {
        Self::new(
            home,
            graph.clone(),
            config.clone(),
            Arc::new(DockerCompose::new(config.runtime_bin.clone())),
            Arc::new(LocalPortProbe),
            Arc::new(HttpHealthProbe::default()),
        )
    }

    pub fn key(&self, identity_id: &str) -> InstanceKey {
        InstanceKey {
            identity_id: identity_id.to_string(),
            kind: ServiceKind::Graph,
            host_port: self.graph.host_port_for(identity_id),
        }
    }

    /// Bring `identity_id`'s graph service to `running`.
    pub async fn start(&self, identity_id: &str) -> Result<ServiceInstance> {
        let key = self.key(identity_id);
        let lock = self.port_lock(key.host_port).await;
        let _guard = lock.lock().await;
        self.start_locked(&key).await
    }

    /// Shut `identity_id`'s graph service down and confirm its port is released.
    pub async fn stop(&self, identity_id: &str) -> Result<ServiceInstance> {
        let key = self.key(identity_id);
        let lock = self.port_lock(key.host_port).await;
        let _guard = lock.lock().await;
        self.stop_locked(&key).await
    }

    /// Stop, confirm the port is released, then start, as one serialized transition.
    pub async fn restart(&self, identity_id: &str) -> Result<ServiceInstance> {
        let key = self.key(identity_id);
        let lock = self.port_lock(key.host_port).await;
        let _guard = lock.lock().await;
        self.stop_locked(&key).await?;
        self.start_locked(&key).await
    }

    /// Snapshot of the instance; `stopped` if it was never started.
    pub async fn status(&self, identity_id: &str) -> ServiceInstance {
        let key = self.key(identity_id);
        self.snapshot(&key).await
    }

    /// Every instance this manager has touched.
    pub async fn instances(&self) -> Vec<ServiceInstance> {
        self.instances.lock().await.values().cloned().collect()
    }

    /// Host-port URL of `identity_id`'s running graph service.
    pub async fn endpoint(&self, identity_id: &str) -> Result<String> {
        let instance = self.status(identity_id).await;
        if instance.state != ServiceState::Running {
            return Err(CortexError::GraphUnavailable(format!(
                "graph service for {identity_id} is {}",
                instance.state
            )));
        }
        Ok(self.base_url(instance.host_port))
    }

    fn base_url(&self, host_port: u16) -> String {
        format!("http://{}:{host_port}", self.graph.host)
    }

    fn health_url(&self, host_port: u16) -> String {
        format!("{}{}", self.base_url(host_port), self.config.health_path)
    }

    /// Whether the container runtime reports the identity's project as up,
    /// regardless of what this manager has recorded.
    pub async fn runtime_running(&self, identity_id: &str) -> Result<bool> {
        let paths = self.paths(identity_id);
        self.runtime
            .is_running(&compose::project_name(identity_id), &paths.compose_file)
            .await
    }

    fn paths(&self, identity_id: &str) -> IdentityPaths {
        IdentityPaths::resolve(&self.home, identity_id)
    }

    async fn port_lock(&self, port: u16) -> Arc<Mutex<()>> {
        let mut locks = self.port_locks.lock().await;
        locks.entry(port).or_default().clone()
    }

    async fn snapshot(&self, key: &InstanceKey) -> ServiceInstance {
        self.instances
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| ServiceInstance::new(key, self.graph.container_port))
    }

    async fn save(&self, instance: ServiceInstance) {
        let key = InstanceKey {
            identity_id: instance.identity_id.clone(),
            kind: instance.kind,
            host_port: instance.host_port,
        };
        self.instances.lock().await.insert(key, instance);
    }

    async fn start_locked(&self, key: &InstanceKey) -> Result<ServiceInstance> {
        let paths = self.paths(&key.identity_id);
        let project = compose::project_name(&key.identity_id);
        let mut instance = self.snapshot(key).await;

        if self.runtime.is_running(&project, &paths.compose_file).await? {
            if instance.state == ServiceState::Running {
                return Ok(instance);
            }
            // Left running by an earlier process.
            if self.health.is_healthy(&self.health_url(key.host_port)).await {
                tracing::info!(
                    identity = %key.identity_id,
                    port = key.host_port,
                    "adopting running graph service"
                );
                enter_starting(&mut instance);
                instance.transition(ServiceState::Running);
                self.save(instance.clone()).await;
                return Ok(instance);
            }
        }

        self.ensure_port_free(key, &project, &paths).await?;

        enter_starting(&mut instance);
        self.save(instance.clone()).await;

        match self.bring_up(key, &project, &paths).await {
            Ok(container_id) => {
                instance.container_id = container_id;
                instance.transition(ServiceState::Running);
                self.save(instance.clone()).await;
                Ok(instance)
            }
            Err(reason) => {
                instance.transition(ServiceState::Failed);
                instance.last_error = Some(reason.clone());
                self.save(instance).await;
                if let Err(e) = self.runtime.down(&project, &paths.compose_file).await {
                    tracing::warn!(
                        project = %project,
                        error = %e,
                        "cleanup after failed start also failed"
                    );
                }
                Err(CortexError::LifecycleFailed {
                    identity: key.identity_id.clone(),
                    reason,
                })
            }
        }
    }

    async fn bring_up(
        &self,
        key: &InstanceKey,
        project: &str,
        paths: &IdentityPaths,
    ) -> std::result::Result<Option<String>, String> {
        compose::write_definition(paths, key.host_port, &self.graph).map_err(|e| e.to_string())?;
        let container_id = self
            .runtime
            .up(project, &paths.compose_file)
            .await
            .map_err(|e| e.to_string())?;

        let url = self.health_url(key.host_port);
        let timeout = Duration::from_secs(self.config.health_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.health.is_healthy(&url).await {
                return Ok(container_id);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "health check at {url} did not pass within {}s",
                    self.config.health_timeout_secs
                ));
            }
            tokio::time::sleep(Duration::from_millis(self.config.health_poll_ms)).await;
        }
    }

    /// Make sure nothing holds `key.host_port` before starting.
    ///
    /// A recorded holder whose container is gone is stale and is force-released.
    /// A live holder is a conflict. An unrecorded binding is given one `down` of
    /// this identity's own project (a leftover from an earlier run) before it too
    /// is reported as a conflict.
    async fn ensure_port_free(
        &self,
        key: &InstanceKey,
        project: &str,
        paths: &IdentityPaths,
    ) -> Result<()> {
        if !self.ports.is_bound(&self.graph.host, key.host_port).await {
            return Ok(());
        }

        let holder = {
            let instances = self.instances.lock().await;
            instances
                .values()
                .find(|i| {
                    i.host_port == key.host_port
                        && i.identity_id != key.identity_id
                        && i.state != ServiceState::Stopped
                })
                .cloned()
        };

        let holder_name = match holder {
            Some(mut holder) => {
                let holder_project = compose::project_name(&holder.identity_id);
                let holder_paths = self.paths(&holder.identity_id);
                if self.runtime.is_running(&holder_project, &holder_paths.compose_file).await? {
                    return Err(CortexError::PortConflict {
                        port: key.host_port,
                        holder: holder.identity_id,
                    });
                }
                tracing::warn!(
                    port = key.host_port,
                    holder = %holder.identity_id,
                    state = %holder.state,
                    "force-releasing stale port holder"
                );
                self.runtime.down(&holder_project, &holder_paths.compose_file).await?;
                release_record(&mut holder);
                let name = holder.identity_id.clone();
                self.save(holder).await;
                name
            }
            None => {
                tracing::warn!(
                    port = key.host_port,
                    "port bound by an unrecorded process, trying own project"
                );
                if let Err(e) = self.runtime.down(project, &paths.compose_file).await {
                    tracing::debug!(
                        project = %project,
                        error = %e,
                        "no leftover project to bring down"
                    );
                }
                "unknown process".to_string()
            }
        };

        if self.wait_for_release(key.host_port).await {
            Ok(())
        } else {
            Err(CortexError::PortConflict {
                port: key.host_port,
                holder: holder_name,
            })
        }
    }

    async fn stop_locked(&self, key: &InstanceKey) -> Result<ServiceInstance> {
        let paths = self.paths(&key.identity_id);
        let project = compose::project_name(&key.identity_id);
        let mut instance = self.snapshot(key).await;

        match instance.state {
            ServiceState::Stopped => {
                if !self.runtime.is_running(&project, &paths.compose_file).await? {
                    return Ok(instance);
                }
                // Left running by an earlier process; adopt it so it can be stopped.
                instance.state = ServiceState::Running;
            }
            ServiceState::Starting => {
                instance.transition(ServiceState::Failed);
            }
            _ => {}
        }

        instance.transition(ServiceState::Stopping);
        self.save(instance.clone()).await;

        if let Err(e) = self.runtime.down(&project, &paths.compose_file).await {
            return Err(self.fail(instance, e.to_string()).await);
        }

        if !self.wait_for_release(key.host_port).await {
            let reason = format!(
                "host port {} still bound after {} release checks",
                key.host_port, self.config.release_retries
            );
            return Err(self.fail(instance, reason).await);
        }

        instance.container_id = None;
        instance.transition(ServiceState::Stopped);
        self.save(instance.clone()).await;
        Ok(instance)
    }

    async fn fail(&self, mut instance: ServiceInstance, reason: String) -> CortexError {
        instance.transition(ServiceState::Failed);
        instance.last_error = Some(reason.clone());
        let identity = instance.identity_id.clone();
        self.save(instance).await;
        tracing::error!(identity = %identity, reason = %reason, "service lifecycle failed");
        CortexError::LifecycleFailed { identity, reason }
    }

    /// Poll until the port is free, with capped exponential backoff.
    async fn wait_for_release(&self, port: u16) -> bool {
        let mut delay = self.config.release_backoff_ms;
        for attempt in 0..=self.config.release_retries {
            if !self.ports.is_bound(&self.graph.host, port).await {
                return true;
            }
            if attempt == self.config.release_retries {
                break;
            }
            tracing::debug!(
                port,
                attempt = attempt + 1,
                delay_ms = delay,
                "waiting for port release"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay = (delay * 2).min(self.config.release_backoff_max_ms);
        }
        false
    }
}

/// Move any settled state to `starting` through legal transitions.
fn enter_starting(instance: &mut ServiceInstance) {
    if matches!(instance.state, ServiceState::Running | ServiceState::Stopping) {
        instance.transition(ServiceState::Failed);
    }
    instance.last_error = None;
    instance.transition(ServiceState::Starting);
}

/// Walk a stale record to `stopped` through legal transitions.
fn release_record(instance: &mut ServiceInstance) {
    if instance.state == ServiceState::Starting {
        instance.transition(ServiceState::Failed);
    }
    if instance.state != ServiceState::Stopping {
        instance.transition(ServiceState::Stopping);
    }
    instance.container_id = None;
    instance.transition(ServiceState::Stopped);
}

#[async_trait]
impl SwitchHook for ServiceLifecycleManager {
    async fn on_switch(&self, previous: Option<&str>, target: &str) -> Result<()> {
        if let Some(previous) = previous {
            self.stop(previous).await?;
        }
        self.start(target).await?;
        Ok(())
    }
}

/// Resolves the graph endpoint of whichever identity is active at call time.
pub struct LifecycleEndpoint {
    lifecycle: Arc<ServiceLifecycleManager>,
    identity: Arc<IdentityContext>,
}

impl LifecycleEndpoint {
    pub fn new(lifecycle: Arc<ServiceLifecycleManager>, identity: Arc<IdentityContext>) -> Self {
        Self { lifecycle, identity }
    }
}

#[async_trait]
impl EndpointResolver for LifecycleEndpoint {
    async fn base_url(&self) -> Result<String> {
        let identity = self.identity.current().await?;
        self.lifecycle.endpoint(&identity).await
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory runtime and probes. "Bound" ports are whatever the fake runtime
    //! has up, plus ports a test marks as held by a foreign process.

    use super::*;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct FakeWorld {
        /// project -> host port it binds while up
        pub up: StdMutex<HashMap<String, u16>>,
        pub foreign: StdMutex<HashSet<u16>>,
        /// Ordered log of runtime calls, e.g. `up:cortex-charlie`.
        pub calls: StdMutex<Vec<String>>,
        pub unhealthy: AtomicBool,
        /// Number of probes that still report a port bound after `down`.
        pub sticky_probes: AtomicUsize,
        pub max_concurrent_binds: AtomicUsize,
    }

    impl FakeWorld {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn port_from_compose(compose_file: &Path) -> u16 {
            let env = compose_file.with_file_name(".env");
            std::fs::read_to_string(env)
                .ok()
                .and_then(|s| {
                    s.lines()
                        .find_map(|l| l.strip_prefix("HOST_PORT="))
                        .and_then(|p| p.parse().ok())
                })
                .unwrap_or(0)
        }
    }

    pub struct FakeRuntime(pub Arc<FakeWorld>);

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn up(&self, project: &str, compose_file: &Path) -> Result<Option<String>> {
            let port = FakeWorld::port_from_compose(compose_file);
            let mut up = self.0.up.lock().unwrap();
            assert!(
                !up.values().any(|p| *p == port),
                "port {port} double-bound by {project}"
            );
            up.insert(project.to_string(), port);
            let bound = up.len();
            self.0.max_concurrent_binds.fetch_max(bound, Ordering::SeqCst);
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

    pub struct FakePorts(pub Arc<FakeWorld>);

    #[async_trait]
    impl PortProbe for FakePorts {
        async fn is_bound(&self, _host: &str, port: u16) -> bool {
            let sticky = self.0.sticky_probes.load(Ordering::SeqCst);
            if sticky > 0 {
                self.0.sticky_probes.store(sticky - 1, Ordering::SeqCst);
                return true;
            }
            self.0.foreign.lock().unwrap().contains(&port)
                || self.0.up.lock().unwrap().values().any(|p| *p == port)
        }
    }

    pub struct FakeHealth(pub Arc<FakeWorld>);

    #[async_trait]
    impl HealthProbe for FakeHealth {
        async fn is_healthy(&self, _url: &str) -> bool {
            !self.0.unhealthy.load(Ordering::SeqCst)
        }
    }

    pub fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            health_timeout_secs: 1,
            health_poll_ms: 10,
            release_retries: 3,
            release_backoff_ms: 5,
            release_backoff_max_ms: 20,
            ..Default::default()
        }
    }

    pub fn manager(home: &Path, world: &Arc<FakeWorld>) -> ServiceLifecycleManager {
        ServiceLifecycleManager::new(
            home,
            GraphConfig::default(),
            fast_config(),
            Arc::new(FakeRuntime(world.clone())),
            Arc::new(FakePorts(world.clone())),
            Arc::new(FakeHealth(world.clone())),
        )
    }
}
