// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Connection establishment for a single configured MCP server.
//!
//! One [`McpSession`] wraps a running rmcp client-role service over whichever
//! transport the server's [`McpServerConfig`] names: a spawned child process
//! speaking stdio, an SSE endpoint, or a streamable-HTTP endpoint. Reconnect
//! logic lives one layer up in [`crate::manager`]; this module only knows how
//! to turn one config entry into one live connection.

use rmcp::model::{CallToolRequestParams, CallToolResult, ListToolsResult, Tool as McpTool};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tracing::debug;

use adk_config::McpServerConfig;

use crate::McpClientError;

/// A live connection to one remote MCP server.
pub struct McpSession {
    server_name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpSession {
    /// Establish a connection per the transport named in `config`.
    pub async fn connect(server_name: &str, config: &McpServerConfig) -> Result<Self, McpClientError> {
        let service = match config {
            McpServerConfig::Stdio { command, args } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|e| McpClientError::Transport(server_name.to_string(), e.to_string()))?;
                ().serve(transport)
                    .await
                    .map_err(|e| McpClientError::Transport(server_name.to_string(), e.to_string()))?
            }
            McpServerConfig::Sse { url } => {
                let transport = SseClientTransport::start(url.clone())
                    .await
                    .map_err(|e| McpClientError::Transport(server_name.to_string(), e.to_string()))?;
                ().serve(transport)
                    .await
                    .map_err(|e| McpClientError::Transport(server_name.to_string(), e.to_string()))?
            }
            McpServerConfig::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().serve(transport)
                    .await
                    .map_err(|e| McpClientError::Transport(server_name.to_string(), e.to_string()))?
            }
        };

        debug!(server = server_name, "connected to MCP server");
        Ok(Self { server_name: server_name.to_string(), service })
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpClientError> {
        let result: ListToolsResult = self
            .service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpClientError::Transport(self.server_name.clone(), e.to_string()))?;
        Ok(result.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpClientError> {
        let arguments = arguments.as_object().cloned();
        let result = self
            .service
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| McpClientError::Transport(self.server_name.clone(), e.to_string()))?;
        Ok(result)
    }

    pub async fn close(self) {
        let _ = self.service.cancel().await;
    }
}
