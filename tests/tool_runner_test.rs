use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cortex::config::ToolServerConfig;
use cortex::error::{CortexError, Result};
use cortex::runner::{
    EphemeralToolRunner, McpConnector, ToolConnector, ToolOutcome, ToolRegistry, ToolSession,
    ToolSpec,
};

const MISSING_BINARY: &str = "/nonexistent/cortex-test-tool-server";

fn broken_spec() -> ToolSpec {
    ToolSpec::new("broken", MISSING_BINARY).with_tag("files")
}

/// Real MCP connector for `broken`, an in-process echo for everything else.
/// Records every session id it hands out.
#[derive(Default)]
struct RecordingConnector {
    sessions: Mutex<Vec<String>>,
}

struct EchoSession {
    id: String,
    server: String,
}

#[async_trait]
impl ToolConnector for RecordingConnector {
    async fn connect(&self, spec: &ToolSpec, session_id: &str) -> Result<Box<dyn ToolSession>> {
        self.sessions.lock().unwrap().push(session_id.to_string());
        if spec.name == "broken" {
            return McpConnector.connect(spec, session_id).await;
        }
        Ok(Box::new(EchoSession {
            id: session_id.to_string(),
            server: spec.name.clone(),
        }))
    }
}

#[async_trait]
impl ToolSession for EchoSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&mut self, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome> {
        Ok(ToolOutcome {
            session_id: self.id.clone(),
            server: self.server.clone(),
            tool: tool.to_string(),
            is_error: false,
            text: arguments.to_string(),
            structured: Some(arguments),
        })
    }

    async fn close(self: Box<Self>) {}
}

#[tokio::test]
async fn missing_server_binary_is_tool_unavailable() {
    let mut registry = ToolRegistry::new();
    registry.register(broken_spec()).unwrap();
    let runner = EphemeralToolRunner::new(registry, Arc::new(McpConnector), Duration::from_secs(5));

    let err = runner
        .invoke_named("broken", "read_file", serde_json::json!({ "path": "/tmp/x" }))
        .await
        .unwrap_err();
    match err {
        CortexError::ToolUnavailable(message) => assert!(message.contains("failed twice")),
        other => panic!("expected ToolUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_invocation_does_not_affect_the_next_one() {
    let mut registry = ToolRegistry::new();
    registry.register(broken_spec()).unwrap();
    registry
        .register(ToolSpec::new("echo", "unused").with_tag("Search"))
        .unwrap();
    let connector = Arc::new(RecordingConnector::default());
    let runner = EphemeralToolRunner::new(registry, connector.clone(), Duration::from_secs(5));

    assert!(runner
        .invoke_by_tag("files", "read_file", serde_json::json!({}))
        .await
        .is_err());

    let outcome = runner
        .invoke_by_tag("search", "lookup", serde_json::json!({ "q": "Portland" }))
        .await
        .unwrap();
    assert_eq!(outcome.server, "echo");
    assert!(!outcome.is_error);
    assert_eq!(outcome.structured, Some(serde_json::json!({ "q": "Portland" })));

    let sessions = connector.sessions.lock().unwrap().clone();
    // two attempts on the broken server, one on the echo server
    assert_eq!(sessions.len(), 3);
    assert_eq!(outcome.session_id, sessions[2]);
    let mut unique = sessions.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), sessions.len());
}

#[tokio::test]
async fn registry_from_config_routes_by_name_and_tag() {
    let servers = vec![ToolServerConfig {
        name: "echo".into(),
        command: "unused".into(),
        args: vec!["--stdio".into()],
        env: Default::default(),
        tags: vec!["Search".into()],
    }];
    let registry = ToolRegistry::from_config(&servers).unwrap();
    let runner = EphemeralToolRunner::new(
        registry,
        Arc::new(RecordingConnector::default()),
        Duration::from_secs(5),
    );

    assert_eq!(runner.registry().get("echo").unwrap().args, vec!["--stdio".to_string()]);
    assert!(runner.invoke_named("echo", "ping", serde_json::Value::Null).await.is_ok());
    assert!(matches!(
        runner.invoke_by_tag("weather", "ping", serde_json::Value::Null).await,
        Err(CortexError::NotFound(_))
    ));
}
