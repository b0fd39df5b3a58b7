//! Short-lived, isolated invocations of external tool servers.
//!
//! Every call to [`EphemeralToolRunner::invoke`] opens a fresh session, makes one
//! call, and closes the session whatever happened. Nothing is shared between
//! calls, so a crashed or confused server cannot affect the next invocation.

pub mod mcp;
pub mod registry;

pub use mcp::McpConnector;
pub use registry::{ToolRegistry, ToolSpec};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CortexError, Result};

/// Result of one tool call. A tool-level failure is `is_error = true`, not an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub session_id: String,
    pub server: String,
    pub tool: String,
    pub is_error: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

/// An open connection to a tool server.
#[async_trait]
pub trait ToolSession: Send {
    /// The id the runner assigned when connecting. Stamped onto every outcome.
    fn id(&self) -> &str;

    /// Transport failures are [`CortexError::ToolUnavailable`].
    async fn call(&mut self, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome>;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self, spec: &ToolSpec, session_id: &str) -> Result<Box<dyn ToolSession>>;
}

pub struct EphemeralToolRunner {
    registry: ToolRegistry,
    connector: Arc<dyn ToolConnector>,
    call_timeout: Duration,
}

impl EphemeralToolRunner {
    pub fn new(
        registry: ToolRegistry,
        connector: Arc<dyn ToolConnector>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke `tool` on the registered server `server`.
    pub async fn invoke_named(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let spec = self
            .registry
            .get(server)
            .ok_or_else(|| CortexError::NotFound(format!("tool server {server}")))?;
        self.invoke(spec, tool, arguments).await
    }

    /// Invoke `tool` on the first registered server tagged `tag`.
    pub async fn invoke_by_tag(
        &self,
        tag: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let spec = self
            .registry
            .by_tag(tag)
            .into_iter()
            .next()
            .ok_or_else(|| CortexError::NotFound(format!("tool server tagged {tag}")))?;
        self.invoke(spec, tool, arguments).await
    }

    /// One call in a fresh session. A transport failure is retried once in
    /// another fresh session before surfacing as `ToolUnavailable`.
    pub async fn invoke(
        &self,
        spec: &ToolSpec,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        match self.attempt(spec, tool, arguments.clone()).await {
            Err(CortexError::ToolUnavailable(first)) => {
                tracing::warn!(
                    server = %spec.name,
                    tool,
                    error = %first,
                    "tool transport failed, retrying in a fresh session"
                );
                match self.attempt(spec, tool, arguments).await {
                    Err(CortexError::ToolUnavailable(second)) => {
                        Err(CortexError::ToolUnavailable(format!(
                            "{}/{tool} failed twice: {first}; {second}",
                            spec.name
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        spec: &ToolSpec,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let session_id = uuid::Uuid::now_v7().to_string();
        tracing::debug!(server = %spec.name, tool, session = %session_id, "opening tool session");

        let connect = self.connector.connect(spec, &session_id);
        let mut session = match tokio::time::timeout(self.call_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CortexError::ToolUnavailable(format!(
                    "{} did not start within {:?}",
                    spec.name, self.call_timeout
                )))
            }
        };

        let call = session.call(tool, arguments);
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CortexError::ToolUnavailable(format!(
                "{}/{tool} timed out after {:?}",
                spec.name, self.call_timeout
            ))),
        };
        let result = result.map(|mut outcome| {
            outcome.session_id = session.id().to_string();
            outcome
        });
        tracing::debug!(
            server = %spec.name,
            tool,
            session = %session.id(),
            ok = result.is_ok(),
            "closing tool session"
        );
        session.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `transport_failures` calls at the transport level.
    #[derive(Default)]
    struct FakeConnector {
        transport_failures: AtomicUsize,
        hang: bool,
        opened: Mutex<Vec<String>>,
        closed: Arc<Mutex<Vec<String>>>,
    }

    struct FakeSession {
        id: String,
        fail: bool,
        hang: bool,
        closed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolConnector for FakeConnector {
        async fn connect(
            &self,
            _spec: &ToolSpec,
            session_id: &str,
        ) -> Result<Box<dyn ToolSession>> {
            self.opened.lock().unwrap().push(session_id.to_string());
            let fail = self
                .transport_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(FakeSession {
                id: session_id.to_string(),
                fail,
                hang: self.hang,
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl ToolSession for FakeSession {
        fn id(&self) -> &str {
            &self.id
        }

        async fn call(&mut self, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail {
                return Err(CortexError::ToolUnavailable("broken pipe".into()));
            }
            Ok(ToolOutcome {
                session_id: String::new(),
                server: "fake".into(),
                tool: tool.into(),
                is_error: tool == "explode",
                text: arguments.to_string(),
                structured: None,
            })
        }

        async fn close(self: Box<Self>) {
            self.closed.lock().unwrap().push(self.id.clone());
        }
    }

    fn runner(connector: Arc<FakeConnector>) -> EphemeralToolRunner {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::new("fake", "fake-server").with_tag("echo")).unwrap();
        EphemeralToolRunner::new(registry, connector, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn each_call_gets_a_fresh_closed_session() {
        let connector = Arc::new(FakeConnector::default());
        let runner = runner(connector.clone());

        let a = runner.invoke_named("fake", "echo", serde_json::json!({"x": 1})).await.unwrap();
        let b = runner.invoke_by_tag("echo", "echo", serde_json::json!({"x": 2})).await.unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert_eq!(*connector.opened.lock().unwrap(), *connector.closed.lock().unwrap());
        assert_eq!(b.text, r#"{"x":2}"#);
    }

    #[tokio::test]
    async fn outcome_carries_the_session_id() {
        let connector = Arc::new(FakeConnector::default());
        let outcome = runner(connector.clone())
            .invoke_named("fake", "echo", serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(outcome.session_id, connector.opened.lock().unwrap()[0]);
    }

    #[tokio::test]
    async fn tool_error_is_a_result_not_a_retry() {
        let connector = Arc::new(FakeConnector::default());
        let outcome = runner(connector.clone())
            .invoke_named("fake", "explode", serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert_eq!(connector.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_retried_once_in_new_session() {
        let connector = Arc::new(FakeConnector {
            transport_failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let outcome = runner(connector.clone())
            .invoke_named("fake", "echo", serde_json::Value::Null)
            .await
            .unwrap();

        let opened = connector.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert_ne!(opened[0], opened[1]);
        assert_eq!(outcome.session_id, opened[1]);
        assert_eq!(connector.closed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_transport_failure_is_unavailable() {
        let connector = Arc::new(FakeConnector {
            transport_failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let err = runner(connector.clone())
            .invoke_named("fake", "echo", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CortexError::ToolUnavailable(_)));
        assert_eq!(connector.closed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hung_call_times_out_and_still_closes() {
        let connector = Arc::new(FakeConnector {
            hang: true,
            ..Default::default()
        });
        let err = runner(connector.clone())
            .invoke_named("fake", "echo", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CortexError::ToolUnavailable(_)));
        assert_eq!(connector.closed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let runner = runner(Arc::new(FakeConnector::default()));
        assert!(matches!(
            runner.invoke_named("nope", "echo", serde_json::Value::Null).await,
            Err(CortexError::NotFound(_))
        ));
    }
}
