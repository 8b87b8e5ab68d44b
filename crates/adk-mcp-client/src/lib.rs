// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `adk-mcp-client` — connects to external MCP servers as a tool source.
//!
//! The counterpart to `adk-mcp` (which *serves* adk's own tools over MCP):
//! this crate *consumes* tools from other MCP servers and exposes them
//! locally as ordinary [`adk_tools::Tool`] implementations, named
//! `mcp_<server>_<tool>` so two servers can never collide.
//!
//! # Architecture
//!
//! ```text
//! adk_config::McpConfig (servers: stdio | sse | http)
//!       │
//!       ▼
//! McpClientManager::connect_all()
//!       │  one McpSession (rmcp RoleClient) per server
//!       ▼
//! McpProxyTool  ──►  ToolRegistry::try_register
//!       │
//!       ▼
//! agent turn loop calls `mcp_<server>_<tool>` like any other tool
//! ```
//!
//! A dropped connection is not fatal: [`ServerHandle::call_tool`] reconnects
//! lazily with exponential backoff on the next call, under a per-server
//! mutex so concurrent calls to the same server never race each other into
//! opening two connections.

pub mod bridge;
pub mod manager;
pub mod proxy;
pub mod session;

pub use manager::{McpClientManager, ServerHandle};
pub use proxy::McpProxyTool;
pub use session::McpSession;

use thiserror::Error;

/// The closed set of ways talking to a remote MCP server can fail.
#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("mcp server '{0}': transport error: {1}")]
    Transport(String, String),
    #[error("mcp server '{0}' is not configured")]
    UnknownServer(String),
}
