//! Active-identity resolution and switching.
//!
//! The active identity lives in a single record on disk (`<home>/current_identity`).
//! [`IdentityContext::current`] re-reads that record on every call; no component
//! keeps a copy across calls. [`IdentityContext::switch`] is serialized and holds a
//! write gate for its whole duration, so readers observe either the old identity or
//! the fully switched one, never an intermediate state.
//!
//! Multi-step work bound to one identity (a graph projection, a repair) takes an
//! [`IdentityLease`]. A switch waits for every outstanding lease before it touches
//! the record, so such work never straddles two identities.

pub mod paths;
pub mod registry;

pub use paths::IdentityPaths;
pub use registry::{Identity, IdentityRegistry, Role};

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};

use crate::error::{CortexError, Result};

/// Reacts to an identity switch, before the switch becomes visible.
///
/// The service lifecycle manager implements this to stop the previous identity's
/// graph service and bring the target's to `running`.
#[async_trait]
pub trait SwitchHook: Send + Sync {
    async fn on_switch(&self, previous: Option<&str>, target: &str) -> Result<()>;
}

/// Result of a completed switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub previous: Option<String>,
    pub current: String,
    #[serde(skip)]
    pub paths: IdentityPaths,
}

/// Proof that an identity stays active until dropped.
pub struct IdentityLease {
    identity_id: String,
    _guard: OwnedRwLockReadGuard<()>,
}

impl IdentityLease {
    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }
}

impl std::fmt::Debug for IdentityLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLease")
            .field("identity_id", &self.identity_id)
            .finish()
    }
}

pub struct IdentityContext {
    home: PathBuf,
    registry: IdentityRegistry,
    gate: RwLock<()>,
    leases: Arc<RwLock<()>>,
    switching: Mutex<()>,
    hook: Option<Arc<dyn SwitchHook>>,
}

impl IdentityContext {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            registry: IdentityRegistry::new(&home),
            home,
            gate: RwLock::new(()),
            leases: Arc::new(RwLock::new(())),
            switching: Mutex::new(()),
            hook: None,
        }
    }

    /// Attach the hook run as the last step of every switch.
    pub fn with_hook(mut self, hook: Arc<dyn SwitchHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Open the context, seeding the registry and the current-identity record
    /// with `default_id` on first run.
    pub fn bootstrap(home: impl Into<PathBuf>, default_id: &str) -> Result<Self> {
        let ctx = Self::new(home);
        let seeded = ctx.registry.ensure_default(default_id)?;
        if ctx.read_record()?.is_none() {
            paths::write_atomic(&ctx.record_path(), seeded.id.as_bytes())?;
            IdentityPaths::resolve(&ctx.home, &seeded.id).ensure()?;
            tracing::info!(identity = %seeded.id, "active identity initialized");
        }
        Ok(ctx)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    fn record_path(&self) -> PathBuf {
        self.home.join("current_identity")
    }

    fn read_record(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(self.record_path()) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The active identity id, read fresh from the source of truth.
    ///
    /// Waits while a switch is in flight.
    pub async fn current(&self) -> Result<String> {
        let _read = self.gate.read().await;
        self.read_record()?
            .ok_or_else(|| CortexError::UnknownIdentity("<no active identity>".into()))
    }

    /// The active identity's full record.
    pub async fn current_identity(&self) -> Result<Identity> {
        let id = self.current().await?;
        self.registry
            .get(&id)?
            .ok_or(CortexError::UnknownIdentity(id))
    }

    /// Paths derived from the active identity, recomputed on every call.
    pub async fn current_paths(&self) -> Result<IdentityPaths> {
        let id = self.current().await?;
        Ok(IdentityPaths::resolve(&self.home, &id))
    }

    /// Fail with [`CortexError::CrossIdentityAccess`] unless `identity_id` is active.
    pub async fn require_active(&self, identity_id: &str) -> Result<()> {
        let active = self.current().await?;
        if active != identity_id {
            return Err(CortexError::CrossIdentityAccess {
                requested: identity_id.to_string(),
                active,
            });
        }
        Ok(())
    }

    /// Pin `identity_id` as the active identity until the lease is dropped.
    ///
    /// Fails with [`CortexError::CrossIdentityAccess`] if another identity is
    /// active. Do not request a second lease while holding one: a queued switch
    /// blocks new leases.
    pub async fn lease(&self, identity_id: &str) -> Result<IdentityLease> {
        let guard = self.leases.clone().read_owned().await;
        self.require_active(identity_id).await?;
        Ok(IdentityLease {
            identity_id: identity_id.to_string(),
            _guard: guard,
        })
    }

    /// Make `target` the active identity.
    ///
    /// Steps: validate against the registry, update the record, recompute derived
    /// paths, then run the switch hook. If the hook fails the record is restored to
    /// the previous identity and the hook is re-run for it on a best-effort basis.
    /// Outstanding leases are drained before the record changes.
    pub async fn switch(&self, target: &str) -> Result<SwitchOutcome> {
        let _switching = self
            .switching
            .try_lock()
            .map_err(|_| CortexError::SwitchInProgress)?;

        if self.registry.get(target)?.is_none() {
            return Err(CortexError::UnknownIdentity(target.to_string()));
        }

        let _leases = self.leases.write().await;
        let _write = self.gate.write().await;
        let previous = self.read_record()?;

        paths::write_atomic(&self.record_path(), target.as_bytes())?;
        let target_paths = IdentityPaths::resolve(&self.home, target);
        target_paths.ensure()?;

        if let Some(hook) = &self.hook {
            let prev = previous.as_deref().filter(|p| *p != target);
            if let Err(e) = hook.on_switch(prev, target).await {
                tracing::error!(
                    target = %target,
                    error = %e,
                    "identity switch failed, rolling back"
                );
                self.rollback(previous.as_deref(), target, hook.as_ref()).await;
                return Err(e);
            }
        }

        tracing::info!(
            previous = previous.as_deref().unwrap_or("<none>"),
            current = %target,
            "identity switched"
        );

        Ok(SwitchOutcome {
            previous,
            current: target.to_string(),
            paths: target_paths,
        })
    }

    async fn rollback(&self, previous: Option<&str>, failed: &str, hook: &dyn SwitchHook) {
        let restored = match previous {
            Some(prev) => paths::write_atomic(&self.record_path(), prev.as_bytes()),
            None => std::fs::remove_file(self.record_path()).map_err(Into::into),
        };
        if let Err(e) = restored {
            tracing::error!(error = %e, "failed to restore identity record");
            return;
        }
        if let Some(prev) = previous.filter(|p| *p != failed) {
            if let Err(e) = hook.on_switch(Some(failed), prev).await {
                tracing::warn!(
                    identity = %prev,
                    error = %e,
                    "could not restore previous identity's services"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn ctx_with(ids: &[&str]) -> (tempfile::TempDir, IdentityContext) {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = IdentityContext::bootstrap(tmp.path(), ids[0]).unwrap();
        for id in &ids[1..] {
            ctx.registry()
                .register(Identity::new(*id, *id, Role::Primary))
                .unwrap();
        }
        (tmp, ctx)
    }

    struct SlowHook;

    #[async_trait]
    impl SwitchHook for SlowHook {
        async fn on_switch(&self, _previous: Option<&str>, _target: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }

    struct FailingHook {
        fail: AtomicBool,
    }

    #[async_trait]
    impl SwitchHook for FailingHook {
        async fn on_switch(&self, _previous: Option<&str>, target: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) && target == "bob" {
                return Err(CortexError::LifecycleFailed {
                    identity: target.into(),
                    reason: "health check timed out".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn current_rereads_source_of_truth() {
        let (tmp, ctx) = ctx_with(&["alice", "bob"]);
        assert_eq!(ctx.current().await.unwrap(), "alice");

        // Another process rewrites the record; no cached value survives.
        std::fs::write(tmp.path().join("current_identity"), "bob\n").unwrap();
        assert_eq!(ctx.current().await.unwrap(), "bob");
        assert_eq!(ctx.current_paths().await.unwrap().identity_id, "bob");
    }

    #[tokio::test]
    async fn switch_to_unknown_identity_fails() {
        let (_tmp, ctx) = ctx_with(&["alice"]);
        let err = ctx.switch("mallory").await.unwrap_err();
        assert!(matches!(err, CortexError::UnknownIdentity(_)));
        assert_eq!(ctx.current().await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn switch_recomputes_paths() {
        let (tmp, ctx) = ctx_with(&["alice", "bob"]);
        let outcome = ctx.switch("bob").await.unwrap();
        assert_eq!(outcome.previous.as_deref(), Some("alice"));
        assert_eq!(outcome.paths.root, tmp.path().join("identities").join("bob"));
        assert!(outcome.paths.graph_data.exists());
    }

    #[tokio::test]
    async fn concurrent_switches_commit_one_target() {
        let (_tmp, ctx) = ctx_with(&["alice", "bob", "carol"]);
        let ctx = Arc::new(ctx.with_hook(Arc::new(SlowHook)));

        let a = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.switch("bob").await }
        });
        let b = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.switch("carol").await }
        });
        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());

        let committed: Vec<&str> = [(&ra, "bob"), (&rb, "carol")]
            .iter()
            .filter(|(r, _)| r.is_ok())
            .map(|(_, id)| *id)
            .collect();
        for r in [&ra, &rb] {
            if let Err(e) = r {
                assert!(matches!(e, CortexError::SwitchInProgress));
            }
        }
        assert_eq!(committed.len(), 1);
        assert_eq!(ctx.current().await.unwrap(), committed[0]);
    }

    #[tokio::test]
    async fn failed_hook_rolls_back_record() {
        let (_tmp, ctx) = ctx_with(&["alice", "bob"]);
        let ctx = ctx.with_hook(Arc::new(FailingHook {
            fail: AtomicBool::new(true),
        }));

        let err = ctx.switch("bob").await.unwrap_err();
        assert!(matches!(err, CortexError::LifecycleFailed { .. }));
        assert_eq!(ctx.current().await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn require_active_rejects_other_identity() {
        let (_tmp, ctx) = ctx_with(&["alice", "bob"]);
        ctx.require_active("alice").await.unwrap();
        assert!(matches!(
            ctx.require_active("bob").await,
            Err(CortexError::CrossIdentityAccess { .. })
        ));
    }

    #[tokio::test]
    async fn switch_waits_for_outstanding_lease() {
        let (_tmp, ctx) = ctx_with(&["alice", "bob"]);
        let ctx = Arc::new(ctx);
        let lease = ctx.lease("alice").await.unwrap();
        assert_eq!(lease.identity_id(), "alice");

        let switch = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.switch("bob").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!switch.is_finished());
        assert_eq!(ctx.current().await.unwrap(), "alice");

        drop(lease);
        switch.await.unwrap().unwrap();
        assert_eq!(ctx.current().await.unwrap(), "bob");
        assert!(matches!(
            ctx.lease("alice").await,
            Err(CortexError::CrossIdentityAccess { .. })
        ));
    }
}
