// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read-only tools exposing the agent-definition catalog: dependency
//! resolution, validation, and a dump of the whole graph.
//!
//! All three share a single [`adk_agents::AgentCatalog`] discovered once at
//! registry build time. The catalog is immutable for the lifetime of the
//! registry — a live reload, like skills and subagents get, is not wired up
//! here since agent definitions change far less often mid-session.

use std::sync::Arc;

use adk_agents::{AgentCatalog, GraphError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

fn graph_error_message(err: &GraphError) -> String {
    match err {
        GraphError::MissingDependency { from, to } => {
            format!("'{from}' depends on '{to}', which does not exist")
        }
        GraphError::VersionMismatch { from, to, constraint, actual } => {
            format!("'{from}' requires '{to}' {constraint}, but '{to}' is at {actual}")
        }
        GraphError::Cycle(path) => format!("dependency cycle: {path}"),
    }
}

/// Resolves an agent's transitive dependency load order.
pub struct ResolveDependenciesTool {
    catalog: Arc<AgentCatalog>,
}

impl ResolveDependenciesTool {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ResolveDependenciesTool {
    fn name(&self) -> &str {
        "resolve_dependencies"
    }

    fn description(&self) -> &str {
        "Resolve an agent definition's transitive dependencies into a load order \
         (dependencies before the agent itself). Fails if a dependency is missing, \
         a version constraint isn't satisfied, or the graph contains a cycle."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the agent definition to resolve"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn parallel_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = match call.args.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'name'"),
        };

        debug!(agent = %name, "resolve_dependencies tool");

        if self.catalog.find(&name).is_none() {
            return ToolOutput::err(&call.id, format!("no agent definition named '{name}'"));
        }

        let graph = match self.catalog.graph() {
            Ok(g) => g,
            Err(e) => return ToolOutput::err(&call.id, graph_error_message(&e)),
        };

        match graph.transitive_dependencies(&name) {
            Ok(deps) if deps.is_empty() => {
                ToolOutput::ok(&call.id, format!("'{name}' has no dependencies."))
            }
            Ok(deps) => ToolOutput::ok(
                &call.id,
                format!("Load order for '{name}': {}", deps.join(" -> ")),
            ),
            Err(e) => ToolOutput::err(&call.id, graph_error_message(&e)),
        }
    }
}

/// Validates a single agent definition: frontmatter, dependency existence,
/// version constraints, and advisory lints.
pub struct ValidateAgentTool {
    catalog: Arc<AgentCatalog>,
}

impl ValidateAgentTool {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ValidateAgentTool {
    fn name(&self) -> &str {
        "validate_agent"
    }

    fn description(&self) -> &str {
        "Validate a discovered agent definition by name: checks that its dependencies \
         exist and satisfy their version constraints, and surfaces advisory lints \
         (short description, shadowed by a higher-precedence source, unresolved dependency)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the agent definition to validate"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn parallel_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = match call.args.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'name'"),
        };

        debug!(agent = %name, "validate_agent tool");

        let def = match self.catalog.find(&name) {
            Some(d) => d,
            None => return ToolOutput::err(&call.id, format!("no agent definition named '{name}'")),
        };

        let mut report = vec![format!(
            "'{name}' ({kind:?}, v{version}, {source}) at {path}",
            kind = def.kind,
            version = def.version,
            source = def.source,
            path = def.path.display()
        )];

        match self.catalog.graph() {
            Ok(graph) => {
                if let Err(e) = graph.transitive_dependencies(&name) {
                    report.push(format!("dependency error: {}", graph_error_message(&e)));
                } else {
                    report.push("dependencies: ok".to_string());
                }
            }
            Err(e) => report.push(format!("graph build error: {}", graph_error_message(&e))),
        }

        let lints: Vec<String> = self
            .catalog
            .lints()
            .into_iter()
            .filter(|issue| issue_mentions(issue, &name))
            .map(|issue| issue.to_string())
            .collect();

        if lints.is_empty() {
            report.push("lints: none".to_string());
        } else {
            report.push(format!("lints:\n  - {}", lints.join("\n  - ")));
        }

        ToolOutput::ok(&call.id, report.join("\n"))
    }
}

fn issue_mentions(issue: &adk_agents::LintIssue, name: &str) -> bool {
    match issue {
        adk_agents::LintIssue::ShadowedByHigherPrecedence { name: n, .. } => n == name,
        adk_agents::LintIssue::DescriptionTooShort { name: n, .. } => n == name,
        adk_agents::LintIssue::UnresolvedDependency { name: n, .. } => n == name,
    }
}

/// Dumps the full dependency graph over every discovered agent definition.
pub struct DependencyGraphTool {
    catalog: Arc<AgentCatalog>,
}

impl DependencyGraphTool {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for DependencyGraphTool {
    fn name(&self) -> &str {
        "dependency_graph"
    }

    fn description(&self) -> &str {
        "Dump the dependency graph over every discovered agent definition: each \
         agent's direct dependencies, plus a deterministic topological load order \
         for the whole set. Fails if the graph has a cycle or an unsatisfiable constraint."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn parallel_safe(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        debug!("dependency_graph tool");

        if self.catalog.definitions().is_empty() {
            return ToolOutput::ok(&call.id, "No agent definitions discovered.");
        }

        let graph = match self.catalog.graph() {
            Ok(g) => g,
            Err(e) => return ToolOutput::err(&call.id, graph_error_message(&e)),
        };

        let order = match graph.resolve() {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, graph_error_message(&e)),
        };

        let mut names: Vec<&str> = self.catalog.definitions().iter().map(|d| d.name.as_str()).collect();
        names.sort();

        let edges: Vec<String> = names
            .iter()
            .map(|name| {
                let deps = graph.direct_dependencies(name);
                if deps.is_empty() {
                    format!("{name}: (no dependencies)")
                } else {
                    format!("{name}: {}", deps.join(", "))
                }
            })
            .collect();

        ToolOutput::ok(
            &call.id,
            format!(
                "Dependencies:\n  {}\n\nLoad order: {}",
                edges.join("\n  "),
                order.join(" -> ")
            ),
        )
    }
}
