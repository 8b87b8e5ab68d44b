// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! [`McpProxyTool`] — an adk [`Tool`] that forwards execution to a remote
//! MCP server instead of running locally.
//!
//! Registered under the name `mcp_<server>_<tool>` (see
//! [`crate::bridge::prefixed_name`]) so a model sees it like any other tool;
//! the forwarding and reconnection are invisible at the call site.

use async_trait::async_trait;
use serde_json::Value;

use adk_tools::{ApprovalPolicy, Tool, ToolCall, ToolOrigin, ToolOutput};

use crate::bridge::call_result_to_output;
use crate::manager::ServerHandle;

/// One remote tool, bound to the server it came from.
pub struct McpProxyTool {
    name: String,
    description: String,
    schema: Value,
    server_name: String,
    remote_name: String,
    handle: ServerHandle,
}

impl McpProxyTool {
    pub fn new(
        name: String,
        description: String,
        schema: Value,
        server_name: String,
        remote_name: String,
        handle: ServerHandle,
    ) -> Self {
        Self { name, description, schema, server_name, remote_name, handle }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn category(&self) -> adk_tools::ToolCategory {
        adk_tools::ToolCategory::Mcp
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Mcp(self.server_name.clone())
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.handle.call_tool(&self.remote_name, call.args.clone()).await {
            Ok(result) => call_result_to_output(&call.id, result),
            Err(e) => ToolOutput::err_kind(
                &call.id,
                adk_tools::ErrorKind::Transport,
                format!("mcp server '{}' unreachable: {e}", self.server_name),
            ),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
