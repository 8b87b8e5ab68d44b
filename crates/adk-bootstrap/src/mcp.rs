// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wires configured external MCP servers into a [`ToolRegistry`].
//!
//! [`build_tool_registry`](crate::build_tool_registry) stays synchronous —
//! every existing call site constructs a registry without an executor
//! around it. Connecting to an external MCP server is inherently async, so
//! that step lives here instead: call [`connect_configured_mcp_servers`]
//! once, right after building the registry and before starting the turn
//! loop, to register every `mcp_<server>_<tool>` tool named in
//! `cfg.tools.mcp`.

use adk_config::Config;
use adk_mcp_client::McpClientManager;
use adk_tools::ToolRegistry;

/// Connect to every server in `cfg.tools.mcp` and register its tools into
/// `registry`. Returns the manager so the caller can keep it alive for the
/// lifetime of the session — dropping it drops every connection — and later
/// call [`McpClientManager::reload`] if the config changes.
///
/// A server that fails to connect is logged and skipped rather than
/// failing startup; it is retried lazily on first use.
pub async fn connect_configured_mcp_servers(
    cfg: &Config,
    registry: &mut ToolRegistry,
) -> McpClientManager {
    let mut manager = McpClientManager::new();
    manager.connect_all(&cfg.tools.mcp, registry).await;
    manager
}
