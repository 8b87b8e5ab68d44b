// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use adk_config::AgentMode;

use crate::policy::ApprovalPolicy;
use crate::safeguards::{self, Safeguard, SafeguardContext};
use crate::tool::{ErrorKind, Tool, ToolCall, ToolCategory, ToolOutput};

pub struct EditLinesTool;

const SAFEGUARDS: &[Safeguard] = &[
    Safeguard::RequirePathInsideWorkspace,
    Safeguard::RefuseEmptyReplacement,
];

#[async_trait]
impl Tool for EditLinesTool {
    fn name(&self) -> &str {
        "edit_lines"
    }

    fn description(&self) -> &str {
        "Insert, delete, or replace a contiguous range of lines in a file by 1-based line \
         number. Prefer edit_file for context-anchored diffs; use edit_lines when you already \
         know the exact line range, or when deleting lines outright (mode=delete does not \
         require content and is the only way to remove text without supplying a replacement)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit"
                },
                "mode": {
                    "type": "string",
                    "enum": ["insert", "delete", "replace"],
                    "description": "insert: add content before start_line. delete: remove \
                                    start_line..=end_line. replace: overwrite \
                                    start_line..=end_line with content."
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-based line number where the operation begins"
                },
                "end_line": {
                    "type": "integer",
                    "description": "1-based inclusive end line (delete/replace only; defaults \
                                    to start_line)"
                },
                "content": {
                    "type": "string",
                    "description": "Replacement or inserted text (required for insert/replace)"
                }
            },
            "required": ["path", "mode", "start_line"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Edit
    }

    fn safeguards(&self) -> &[Safeguard] {
        SAFEGUARDS
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Missing required parameter: path"),
        };
        let mode = match call.args.get("mode").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Missing required parameter: mode"),
        };
        let start_line = match call.args.get("start_line").and_then(|v| v.as_u64()) {
            Some(n) if n >= 1 => n as usize,
            _ => return ToolOutput::err(&call.id, "start_line must be a positive integer"),
        };
        let end_line = call
            .args
            .get("end_line")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(start_line);
        let content = call.args.get("content").and_then(|v| v.as_str()).unwrap_or("");

        debug!(path = %path, mode = %mode, start_line, end_line, "edit_lines tool");

        let ctx = SafeguardContext {
            path: Some(std::path::Path::new(&path)),
            workspace_root: safeguards::workspace_root().as_deref(),
            new_content: if mode == "delete" { None } else { Some(content) },
            ..Default::default()
        };
        if let Err(violation) = safeguards::enforce(self.safeguards(), &ctx) {
            return ToolOutput::err_kind(&call.id, ErrorKind::SafeguardViolation, violation.to_string());
        }

        let original = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err_kind(&call.id, ErrorKind::NotFound, format!("read error: {e}")),
        };
        let had_trailing_newline = original.ends_with('\n');
        let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

        if start_line > lines.len() + 1 || end_line < start_line {
            return ToolOutput::err_kind(
                &call.id,
                ErrorKind::InvalidInput,
                format!(
                    "invalid line range {start_line}..={end_line} for a {}-line file",
                    lines.len()
                ),
            );
        }

        match mode.as_str() {
            "insert" => {
                let at = (start_line - 1).min(lines.len());
                let inserted: Vec<String> = content.lines().map(str::to_string).collect();
                lines.splice(at..at, inserted);
            }
            "delete" => {
                let from = start_line - 1;
                let to = end_line.min(lines.len());
                if from < to {
                    lines.drain(from..to);
                }
            }
            "replace" => {
                let from = start_line - 1;
                let to = end_line.min(lines.len());
                let replacement: Vec<String> = content.lines().map(str::to_string).collect();
                lines.splice(from..to, replacement);
            }
            other => {
                return ToolOutput::err_kind(
                    &call.id,
                    ErrorKind::InvalidInput,
                    format!("unknown mode '{other}'; expected insert, delete, or replace"),
                );
            }
        }

        let mut new_content = lines.join("\n");
        if had_trailing_newline || new_content.is_empty() {
            new_content.push('\n');
        }

        match tokio::fs::write(&path, &new_content).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("{mode} applied to {path} at line {start_line}")),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolCall};

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "el1".into(), name: "edit_lines".into(), args }
    }

    fn tmp_file(content: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        let path = format!("/tmp/adk_edit_lines_test_{}_{n}.txt", std::process::id());
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn replace_with_empty_content_is_refused() {
        let path = tmp_file("one\ntwo\nthree\n");
        let t = EditLinesTool;
        let out = t
            .execute(&call(json!({"path": path, "mode": "replace", "start_line": 2, "content": ""})))
            .await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::SafeguardViolation));
        assert!(out.content.contains("edit_lines with mode=delete") || out.content.contains("mode=delete"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn delete_mode_allows_empty_content() {
        let path = tmp_file("one\ntwo\nthree\n");
        let t = EditLinesTool;
        let out = t
            .execute(&call(json!({"path": path, "mode": "delete", "start_line": 2})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\nthree\n");
    }

    #[tokio::test]
    async fn replace_range_overwrites_lines() {
        let path = tmp_file("a\nb\nc\nd\n");
        let t = EditLinesTool;
        let out = t
            .execute(&call(json!({
                "path": path, "mode": "replace", "start_line": 2, "end_line": 3, "content": "X\nY"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nX\nY\nd\n");
    }

    #[tokio::test]
    async fn insert_adds_lines_before_start() {
        let path = tmp_file("a\nb\n");
        let t = EditLinesTool;
        let out = t
            .execute(&call(json!({"path": path, "mode": "insert", "start_line": 2, "content": "new"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nnew\nb\n");
    }

    #[tokio::test]
    async fn invalid_range_is_rejected() {
        let path = tmp_file("a\nb\n");
        let t = EditLinesTool;
        let out = t
            .execute(&call(json!({"path": path, "mode": "delete", "start_line": 50})))
            .await;
        assert!(out.is_error);
        assert_eq!(out.kind, Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn only_available_in_agent_mode() {
        assert_eq!(EditLinesTool.modes(), &[AgentMode::Agent]);
    }
}
