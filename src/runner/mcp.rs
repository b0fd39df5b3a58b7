//! Tool sessions over MCP stdio, one child process per session.

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, RawContent};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use std::process::Stdio;

use super::{ToolConnector, ToolOutcome, ToolSession, ToolSpec};
use crate::error::{CortexError, Result};

/// Spawns the configured server command and speaks MCP to it over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl ToolConnector for McpConnector {
    async fn connect(&self, spec: &ToolSpec, session_id: &str) -> Result<Box<dyn ToolSession>> {
        let mut command = tokio::process::Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let transport = TokioChildProcess::new(command).map_err(|e| {
            CortexError::ToolUnavailable(format!("failed to spawn {}: {e}", spec.command))
        })?;
        let service = ().serve(transport).await.map_err(|e| {
            CortexError::ToolUnavailable(format!(
                "{} did not complete the MCP handshake: {e}",
                spec.name
            ))
        })?;

        Ok(Box::new(McpSession {
            id: session_id.to_string(),
            server: spec.name.clone(),
            service: Some(service),
        }))
    }
}

struct McpSession {
    id: String,
    server: String,
    service: Option<RunningService<RoleClient, ()>>,
}

#[async_trait]
impl ToolSession for McpSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&mut self, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| {
                CortexError::ToolUnavailable(format!("session {} already closed", self.id))
            })?;

        let mut params = serde_json::json!({ "name": tool });
        if !arguments.is_null() {
            params["arguments"] = arguments;
        }
        let request: CallToolRequestParams = serde_json::from_value(params)
            .map_err(|e| {
                CortexError::InvalidInput(format!("tool arguments must be an object: {e}"))
            })?;

        match service.call_tool(request).await {
            Ok(result) => Ok(outcome_from(&self.id, &self.server, tool, result)),
            // The server answered with a protocol error: the tool ran and refused.
            Err(ServiceError::McpError(error)) => Ok(ToolOutcome {
                session_id: self.id.clone(),
                server: self.server.clone(),
                tool: tool.to_string(),
                is_error: true,
                text: error.message.to_string(),
                structured: None,
            }),
            Err(e) => Err(CortexError::ToolUnavailable(format!(
                "{} transport failed during {tool}: {e}",
                self.server
            ))),
        }
    }

    async fn close(mut self: Box<Self>) {
        if let Some(service) = self.service.take() {
            if let Err(e) = service.cancel().await {
                tracing::debug!(
                    session = %self.id,
                    error = %e,
                    "tool session did not shut down cleanly"
                );
            }
        }
    }
}

fn outcome_from(session_id: &str, server: &str, tool: &str, result: CallToolResult) -> ToolOutcome {
    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    ToolOutcome {
        session_id: session_id.to_string(),
        server: server.to_string(),
        tool: tool.to_string(),
        is_error: result.is_error.unwrap_or(false),
        text,
        structured: result.structured_content,
    }
}
