// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Type conversions between rmcp's MCP model types and adk's tool types.
//!
//! Mirrors `adk-mcp`'s `bridge` module but runs in the opposite direction:
//! there we convert adk tools *into* MCP wire types to serve them; here we
//! convert MCP wire types coming *from* a remote server into adk tool types
//! so they can be registered as ordinary [`adk_tools::Tool`] implementations.

use rmcp::model::{CallToolResult, Content, RawContent, Tool as McpTool};
use adk_tools::{ToolOutput, ToolOutputPart};

/// Prefix a remote tool's bare name with its server name, per the
/// `mcp_<server>_<tool>` naming convention used to expose remote tools
/// locally without collisions between servers.
pub fn prefixed_name(server: &str, remote_name: &str) -> String {
    format!("mcp_{server}_{remote_name}")
}

/// Extract `(name, description, input_schema)` from an rmcp [`Tool`] so a
/// local proxy tool can answer `parameters_schema`/`description` without
/// holding onto the rmcp type directly.
pub fn mcp_tool_parts(tool: &McpTool) -> (String, String, serde_json::Value) {
    let name = tool.name.to_string();
    let description = tool.description.clone().unwrap_or_default().to_string();
    let schema = serde_json::Value::Object((*tool.input_schema).clone());
    (name, description, schema)
}

/// Convert an rmcp [`CallToolResult`] into a adk [`ToolOutput`].
pub fn call_result_to_output(call_id: &str, result: CallToolResult) -> ToolOutput {
    let parts: Vec<ToolOutputPart> = result
        .content
        .iter()
        .filter_map(content_to_part)
        .collect();

    let parts = if parts.is_empty() {
        vec![ToolOutputPart::Text(String::new())]
    } else {
        parts
    };

    let mut out = ToolOutput::with_parts(call_id, parts);
    if result.is_error.unwrap_or(false) {
        out.is_error = true;
        out.kind = Some(adk_tools::ErrorKind::Backend);
    }
    out
}

fn content_to_part(content: &Content) -> Option<ToolOutputPart> {
    match &**content {
        RawContent::Text(t) => Some(ToolOutputPart::Text(t.text.clone())),
        RawContent::Image(img) => Some(ToolOutputPart::Image(format!(
            "data:{};base64,{}",
            img.mime_type, img.data
        ))),
        _ => None,
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_name_follows_convention() {
        assert_eq!(prefixed_name("github", "search_issues"), "mcp_github_search_issues");
    }

    #[test]
    fn call_result_to_output_empty_content_is_empty_text() {
        let result = CallToolResult::success(vec![]);
        let out = call_result_to_output("id1", result);
        assert!(!out.is_error);
        assert_eq!(out.content, "");
    }

    #[test]
    fn call_result_to_output_text_content_round_trips() {
        let result = CallToolResult::success(vec![Content::text("hello")]);
        let out = call_result_to_output("id2", result);
        assert_eq!(out.content, "hello");
        assert!(!out.is_error);
    }

    #[test]
    fn call_result_to_output_error_flag_maps_to_backend_kind() {
        let mut result = CallToolResult::success(vec![Content::text("boom")]);
        result.is_error = Some(true);
        let out = call_result_to_output("id3", result);
        assert!(out.is_error);
        assert_eq!(out.kind, Some(adk_tools::ErrorKind::Backend));
    }
}
