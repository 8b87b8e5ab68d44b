// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use adk_config::AgentMode;

use crate::tool::ToolCategory;
use crate::{Tool, ToolCall, ToolOrigin, ToolOutput};

/// A tool schema – mirrors adk_model::ToolSchema but keeps tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Full descriptor of a registered tool: the schema plus the registry
/// metadata that drives listing, origin tracking, and reload.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub priority: u32,
    pub origin: ToolOrigin,
    pub is_long_running: bool,
    /// Whether the Runner may dispatch this call concurrently with other
    /// calls in the same round rather than serializing it.
    pub parallel_safe: bool,
}

/// Filter passed to [`ToolRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub category: Option<ToolCategory>,
    pub origin_prefix: Option<String>,
}

/// Failure modes for [`ToolRegistry::try_register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool name conflict: '{0}' is already registered")]
    NameConflict(String),
    #[error("invalid schema for tool '{0}': {1}")]
    InvalidSchema(String, String),
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Names registered as builtins; `unregister` refuses these.
    builtins: std::collections::HashSet<String>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
// - Parallel tool execution is safe because tools are immutable after registration
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), builtins: std::collections::HashSet::new() }
    }

    /// Register a builtin tool, overwriting any prior registration under the
    /// same name. Kept for startup wiring and existing call sites; prefer
    /// [`ToolRegistry::try_register`] for anything that should reject name
    /// collisions (MCP/agent tools registered after startup).
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.builtins.insert(name.clone());
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register a tool, failing on name collision or a self-inconsistent
    /// JSON Schema. Used for MCP- and agent-backed tools registered after
    /// startup, where a silent overwrite would hide a real naming conflict.
    pub fn try_register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::NameConflict(name));
        }
        if let Err(e) = validate_schema(&tool.parameters_schema()) {
            return Err(RegistryError::InvalidSchema(name, e));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Remove a previously registered tool. Builtins may never be
    /// unregistered.
    pub fn unregister(&mut self, name: &str) -> Result<(), &'static str> {
        if self.builtins.contains(name) {
            return Err("cannot unregister a builtin tool");
        }
        match self.tools.remove(name) {
            Some(_) => Ok(()),
            None => Err("not_found"),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Lookup a tool's descriptor by name.
    pub fn lookup(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| descriptor_of(t.as_ref()))
    }

    /// List descriptors, optionally filtered by category/origin prefix,
    /// ordered by `(category, priority ascending, name ascending)`.
    pub fn list(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| descriptor_of(t.as_ref()))
            .filter(|d| filter.category.map(|c| c == d.category).unwrap_or(true))
            .filter(|d| {
                filter
                    .origin_prefix
                    .as_deref()
                    .map(|p| origin_tag(&d.origin).starts_with(p))
                    .unwrap_or(true)
            })
            .collect();
        out.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(a.priority.cmp(&b.priority))
                .then(a.name.cmp(&b.name))
        });
        out
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err_kind(
                &call.id,
                crate::tool::ErrorKind::NotFound,
                format!("unknown tool: {}", call.name),
            ),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

fn descriptor_of(tool: &dyn Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        category: tool.category(),
        priority: tool.priority(),
        origin: tool.origin(),
        is_long_running: matches!(
            tool.output_category(),
            crate::tool::OutputCategory::HeadTail
        ),
        parallel_safe: tool.parallel_safe(),
    }
}

/// Whether a batch of tool calls may be dispatched concurrently: every call
/// in the batch must resolve to a known, `parallel_safe` tool. A single
/// unknown-name or non-`parallel_safe` call forces the whole batch
/// sequential, matching arrival-order semantics for the non-parallel case.
pub fn batch_is_parallel_safe(registry: &ToolRegistry, calls: &[ToolCall]) -> bool {
    calls.len() > 1
        && calls
            .iter()
            .all(|c| registry.lookup(&c.name).map(|d| d.parallel_safe).unwrap_or(false))
}

fn origin_tag(origin: &ToolOrigin) -> String {
    match origin {
        ToolOrigin::Builtin => "builtin".to_string(),
        ToolOrigin::Mcp(server) => format!("mcp:{server}"),
        ToolOrigin::Agent(name) => format!("agent:{name}"),
    }
}

/// Self-consistency check for a tool's declared JSON Schema: must be a
/// `type: object` schema so argument validation has something to validate
/// against.
fn validate_schema(schema: &serde_json::Value) -> Result<(), String> {
    match schema.get("type").and_then(|v| v.as_str()) {
        Some("object") => Ok(()),
        Some(other) => Err(format!("schema type must be 'object', got '{other}'")),
        None => Err("schema missing 'type' field".to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    /// Minimal no-op tool for registry tests.
    struct EchoTool { name: &'static str }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "echoes its input" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn get_unknown_returns_none() {
        let reg = ToolRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn names_returns_all_registered() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn schemas_contains_registered_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "my_tool" });
        let schemas = reg.schemas();
        assert!(schemas.iter().any(|s| s.name == "my_tool"));
    }

    #[test]
    fn schemas_include_description() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        let schemas = reg.schemas();
        assert_eq!(schemas[0].description, "echoes its input");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({"x":1}) };
        let out = reg.execute(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }

    // ── try_register / unregister / lookup / list ─────────────────────────────

    #[test]
    fn try_register_rejects_name_conflict() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "dup" });
        let err = reg.try_register(EchoTool { name: "dup" }).unwrap_err();
        assert_eq!(err, RegistryError::NameConflict("dup".to_string()));
    }

    #[test]
    fn try_register_accepts_new_name() {
        let mut reg = ToolRegistry::new();
        assert!(reg.try_register(EchoTool { name: "fresh" }).is_ok());
        assert!(reg.get("fresh").is_some());
    }

    struct BadSchemaTool;

    #[async_trait]
    impl Tool for BadSchemaTool {
        fn name(&self) -> &str { "bad" }
        fn description(&self) -> &str { "has a non-object schema" }
        fn parameters_schema(&self) -> Value { json!("not an object schema") }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn try_register_rejects_invalid_schema() {
        let mut reg = ToolRegistry::new();
        let err = reg.try_register(BadSchemaTool).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema(_, _)));
    }

    #[test]
    fn unregister_removes_non_builtin_tool() {
        let mut reg = ToolRegistry::new();
        reg.try_register(EchoTool { name: "mcp_tool" }).unwrap();
        assert!(reg.unregister("mcp_tool").is_ok());
        assert!(reg.get("mcp_tool").is_none());
    }

    #[test]
    fn unregister_refuses_builtin() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "builtin_tool" });
        assert!(reg.unregister("builtin_tool").is_err());
        assert!(reg.get("builtin_tool").is_some());
    }

    #[test]
    fn unregister_unknown_name_is_not_found() {
        let mut reg = ToolRegistry::new();
        assert_eq!(reg.unregister("nope"), Err("not_found"));
    }

    #[test]
    fn lookup_returns_descriptor_with_builtin_origin() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let d = reg.lookup("echo").unwrap();
        assert_eq!(d.origin, ToolOrigin::Builtin);
        assert_eq!(d.category, ToolCategory::Workspace);
    }

    #[test]
    fn list_orders_by_category_then_priority_then_name() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "b" });
        reg.register(EchoTool { name: "a" });
        let names: Vec<String> = reg.list(&ToolFilter::default()).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn execute_unknown_tool_has_not_found_kind() {
        let reg = ToolRegistry::new();
        let out = reg.execute(&ToolCall {
            id: "x".into(),
            name: "missing".into(),
            args: json!({}),
        }).await;
        assert_eq!(out.kind, Some(crate::tool::ErrorKind::NotFound));
    }

    // ── parallel_safe dispatch gating ─────────────────────────────────────────

    struct ParallelSafeTool { name: &'static str }

    #[async_trait]
    impl Tool for ParallelSafeTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "read-only" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        fn parallel_safe(&self) -> bool { true }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn descriptor_parallel_safe_defaults_to_false() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "e" });
        assert!(!reg.lookup("e").unwrap().parallel_safe);
    }

    #[test]
    fn descriptor_reflects_tool_parallel_safe_override() {
        let mut reg = ToolRegistry::new();
        reg.register(ParallelSafeTool { name: "p" });
        assert!(reg.lookup("p").unwrap().parallel_safe);
    }

    #[test]
    fn batch_is_parallel_safe_true_when_every_call_is_parallel_safe() {
        let mut reg = ToolRegistry::new();
        reg.register(ParallelSafeTool { name: "a" });
        reg.register(ParallelSafeTool { name: "b" });
        let calls = vec![
            ToolCall { id: "1".into(), name: "a".into(), args: json!({}) },
            ToolCall { id: "2".into(), name: "b".into(), args: json!({}) },
        ];
        assert!(batch_is_parallel_safe(&reg, &calls));
    }

    #[test]
    fn batch_is_parallel_safe_false_if_any_call_is_not_parallel_safe() {
        let mut reg = ToolRegistry::new();
        reg.register(ParallelSafeTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        let calls = vec![
            ToolCall { id: "1".into(), name: "a".into(), args: json!({}) },
            ToolCall { id: "2".into(), name: "b".into(), args: json!({}) },
        ];
        assert!(!batch_is_parallel_safe(&reg, &calls));
    }

    #[test]
    fn batch_is_parallel_safe_false_for_unknown_tool_name() {
        let mut reg = ToolRegistry::new();
        reg.register(ParallelSafeTool { name: "a" });
        let calls = vec![
            ToolCall { id: "1".into(), name: "a".into(), args: json!({}) },
            ToolCall { id: "2".into(), name: "ghost".into(), args: json!({}) },
        ];
        assert!(!batch_is_parallel_safe(&reg, &calls));
    }

    #[test]
    fn batch_is_parallel_safe_false_for_single_call() {
        let mut reg = ToolRegistry::new();
        reg.register(ParallelSafeTool { name: "a" });
        let calls = vec![ToolCall { id: "1".into(), name: "a".into(), args: json!({}) }];
        assert!(!batch_is_parallel_safe(&reg, &calls), "a lone call never needs parallel dispatch");
    }
}
