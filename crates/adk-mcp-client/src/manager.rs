// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! [`McpClientManager`] — owns one connection per configured remote MCP
//! server, reconnects with exponential backoff on failure, and keeps a
//! [`adk_tools::ToolRegistry`] in sync with whatever tools each server
//! currently advertises.
//!
//! Each server gets its own [`tokio::sync::Mutex`]-guarded session so a
//! reconnect on one server never blocks calls to another, and a config
//! reload can atomically swap a server's connection without a caller ever
//! observing a half-torn state: the mutex is held for the whole
//! disconnect-then-reconnect sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use adk_config::{McpConfig, McpServerConfig};
use adk_tools::ToolRegistry;

use crate::bridge::{mcp_tool_parts, prefixed_name};
use crate::proxy::McpProxyTool;
use crate::session::McpSession;
use crate::McpClientError;

/// Backoff schedule for reconnect attempts, in milliseconds.
const BACKOFF_SCHEDULE_MS: &[u64] = &[500, 1_000, 2_000, 5_000, 10_000, 30_000];

/// Thread-safe handle to one server's session, shared by every
/// [`McpProxyTool`] registered for that server.
#[derive(Clone)]
pub struct ServerHandle {
    server_name: String,
    session: Arc<Mutex<Option<McpSession>>>,
    config: Arc<McpServerConfig>,
}

impl ServerHandle {
    pub fn new(server_name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            server_name: server_name.into(),
            session: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        }
    }

    pub async fn call_tool(
        &self,
        remote_name: &str,
        arguments: serde_json::Value,
    ) -> Result<rmcp::model::CallToolResult, McpClientError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(reconnect_with_backoff(&self.server_name, &self.config).await?);
        }
        let session = guard.as_ref().expect("just connected above");
        match session.call_tool(remote_name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // The connection may have died between calls; drop it so the
                // next invocation reconnects instead of retrying a dead pipe.
                warn!(server = %self.server_name, error = %e, "mcp call failed, dropping session");
                *guard = None;
                Err(e)
            }
        }
    }
}

async fn reconnect_with_backoff(
    server_name: &str,
    config: &McpServerConfig,
) -> Result<McpSession, McpClientError> {
    let mut last_err = None;
    for delay_ms in BACKOFF_SCHEDULE_MS {
        match McpSession::connect(server_name, config).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                warn!(server = server_name, error = %e, delay_ms, "mcp reconnect attempt failed");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| McpClientError::Transport(server_name.to_string(), "exhausted retries".into())))
}

/// Owns every configured server's connection and the tool names it
/// contributed to the registry, so a reload can cleanly unregister stale
/// tools before registering the fresh set.
pub struct McpClientManager {
    handles: HashMap<String, ServerHandle>,
    registered_tool_names: HashMap<String, Vec<String>>,
}

impl McpClientManager {
    pub fn new() -> Self {
        Self { handles: HashMap::new(), registered_tool_names: HashMap::new() }
    }

    /// Connect to every server in `config` and register its advertised
    /// tools into `registry` under the `mcp_<server>_<tool>` naming
    /// convention. A server that fails its initial connection is logged and
    /// skipped rather than failing the whole startup — it will be retried
    /// lazily on first use via [`ServerHandle::call_tool`]'s reconnect path.
    pub async fn connect_all(&mut self, config: &McpConfig, registry: &mut ToolRegistry) {
        for (server_name, server_config) in &config.servers {
            self.connect_one(server_name, server_config, registry).await;
        }
    }

    async fn connect_one(
        &mut self,
        server_name: &str,
        server_config: &McpServerConfig,
        registry: &mut ToolRegistry,
    ) {
        let handle = ServerHandle::new(server_name, server_config.clone());

        let tools = match McpSession::connect(server_name, server_config).await {
            Ok(session) => {
                let tools = session.list_tools().await.unwrap_or_default();
                *handle.session.lock().await = Some(session);
                tools
            }
            Err(e) => {
                warn!(server = server_name, error = %e, "initial mcp connection failed, will retry lazily");
                Vec::new()
            }
        };

        let mut registered = Vec::new();
        for tool in &tools {
            let (remote_name, description, schema) = mcp_tool_parts(tool);
            let local_name = prefixed_name(server_name, &remote_name);
            let proxy = McpProxyTool::new(
                local_name.clone(),
                description,
                schema,
                server_name.to_string(),
                remote_name,
                handle.clone(),
            );
            match registry.try_register(proxy) {
                Ok(()) => registered.push(local_name),
                Err(e) => warn!(server = server_name, error = %e, "could not register mcp tool"),
            }
        }

        debug!(server = server_name, count = registered.len(), "registered mcp tools");
        self.registered_tool_names.insert(server_name.to_string(), registered);
        self.handles.insert(server_name.to_string(), handle);
    }

    /// Reload configuration: unregister every tool previously contributed by
    /// a server whose config changed or disappeared, then reconnect and
    /// re-register from the new config. Servers whose config is unchanged
    /// keep their live connection.
    pub async fn reload(&mut self, config: &McpConfig, registry: &mut ToolRegistry) {
        let stale: Vec<String> = self
            .registered_tool_names
            .keys()
            .filter(|name| !config.servers.contains_key(*name))
            .cloned()
            .collect();

        for server_name in &stale {
            self.unregister_server(server_name, registry);
        }

        for (server_name, server_config) in &config.servers {
            if let Some(existing) = self.handles.get(server_name) {
                if existing.config.as_ref() == server_config {
                    continue;
                }
            }
            self.unregister_server(server_name, registry);
            self.connect_one(server_name, server_config, registry).await;
        }
    }

    fn unregister_server(&mut self, server_name: &str, registry: &mut ToolRegistry) {
        if let Some(names) = self.registered_tool_names.remove(server_name) {
            for name in names {
                let _ = registry.unregister(&name);
            }
        }
        self.handles.remove(server_name);
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for McpClientManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
