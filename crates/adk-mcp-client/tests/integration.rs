// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! End-to-end test of the client-side bridge against a real [`AdkMcpServer`].
//!
//! Connects an rmcp client-role service to a real server over in-memory
//! duplex pipes (the same harness shape `adk-mcp`'s own integration tests
//! use, mirrored for the client), then feeds the results through
//! `adk_mcp_client::bridge` to confirm the round trip matches what a adk
//! `Tool` would see.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::ServiceExt;
use serde_json::{json, Value};

use adk_mcp::AdkMcpServer;
use adk_mcp_client::bridge::{call_result_to_output, mcp_tool_parts, prefixed_name};
use adk_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput, ToolRegistry};

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes the message argument back to the caller"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let msg = call.args.get("message").and_then(Value::as_str).unwrap_or("no message");
        ToolOutput::ok(&call.id, msg)
    }
}

struct AlwaysFailTool;

#[async_trait]
impl Tool for AlwaysFailTool {
    fn name(&self) -> &str {
        "always_fail"
    }
    fn description(&self) -> &str {
        "Always returns an error"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::err(&call.id, "this tool always fails")
    }
}

async fn connected_client(
    registry: Arc<ToolRegistry>,
) -> rmcp::service::RunningService<rmcp::service::RoleClient, ()> {
    let (client_stream, server_stream) = tokio::io::duplex(65536);
    tokio::spawn(async move {
        let server = AdkMcpServer::new(registry);
        if let Ok(running) = server.serve(server_stream).await {
            let _ = running.waiting().await;
        }
    });
    ().serve(client_stream).await.expect("client handshake must succeed")
}

#[tokio::test]
async fn list_tools_and_bridge_name_prefix() {
    let reg = Arc::new({
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r
    });
    let client = connected_client(reg).await;

    let tools = client.list_tools(Default::default()).await.expect("list_tools must succeed").tools;
    assert_eq!(tools.len(), 1);

    let (remote_name, description, schema) = mcp_tool_parts(&tools[0]);
    assert_eq!(remote_name, "echo");
    assert_eq!(description, "Echoes the message argument back to the caller");
    assert_eq!(schema["type"], "object");
    assert_eq!(prefixed_name("demo_server", &remote_name), "mcp_demo_server_echo");

    let _ = client.cancel().await;
}

#[tokio::test]
async fn call_tool_success_bridges_to_tool_output() {
    let reg = Arc::new({
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r
    });
    let client = connected_client(reg).await;

    let mut args = serde_json::Map::new();
    args.insert("message".to_string(), json!("hi from client"));
    let result = client
        .call_tool(CallToolRequestParams { name: "echo".into(), arguments: Some(args) })
        .await
        .expect("call_tool must succeed");

    let output = call_result_to_output("call-1", result);
    assert!(!output.is_error);
    assert_eq!(output.content, "hi from client");

    let _ = client.cancel().await;
}

#[tokio::test]
async fn call_tool_error_bridges_to_backend_error_kind() {
    let reg = Arc::new({
        let mut r = ToolRegistry::new();
        r.register(AlwaysFailTool);
        r
    });
    let client = connected_client(reg).await;

    let result = client
        .call_tool(CallToolRequestParams { name: "always_fail".into(), arguments: None })
        .await
        .expect("call_tool must succeed at the transport level");

    let output = call_result_to_output("call-2", result);
    assert!(output.is_error);
    assert_eq!(output.kind, Some(adk_tools::ErrorKind::Backend));
    assert!(output.content.contains("always fails"));

    let _ = client.cancel().await;
}
