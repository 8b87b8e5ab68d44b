// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! RunAgentTool — invokes a named, discovered agent definition as a sub-agent.
//!
//! Unlike [`crate::task_tool::TaskTool`], which spawns a sub-agent with the
//! default system prompt for a freeform task, `run_agent` loads a specific
//! agent definition (by name) from the catalog, resolves its dependency
//! chain, and runs the sub-agent with the concatenated definition content as
//! its system prompt via `AgentRuntimeContext::system_prompt_override`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use adk_agents::AgentCatalog;
use adk_config::{AgentConfig, Config};
use adk_core::{Agent, AgentEvent, AgentRuntimeContext, ContextBudget};

use adk_tools::{
    events::{TodoItem, ToolEvent},
    policy::ApprovalPolicy,
    tool::{Tool, ToolCall, ToolOutput},
};

use crate::context::ToolSetProfile;
use crate::registry::build_tool_registry;

const MAX_DEPTH: usize = 3;

/// Spawns a sub-agent running a specific discovered agent definition.
pub struct RunAgentTool {
    catalog: Arc<AgentCatalog>,
    model: Arc<dyn adk_model::ModelProvider>,
    config: Arc<Config>,
    depth: Arc<AtomicUsize>,
    sub_agent_runtime: AgentRuntimeContext,
}

impl RunAgentTool {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        model: Arc<dyn adk_model::ModelProvider>,
        config: Arc<Config>,
        depth: Arc<AtomicUsize>,
        sub_agent_runtime: AgentRuntimeContext,
    ) -> Self {
        Self {
            catalog,
            model,
            config,
            depth,
            sub_agent_runtime,
        }
    }

    /// Build the combined system prompt for `name`: its transitive
    /// dependencies' bodies (load order first), then its own body.
    fn build_system_prompt(&self, name: &str) -> Result<String, String> {
        let graph = self.catalog.graph().map_err(|e| e.to_string())?;
        let load_order = graph.transitive_dependencies(name).map_err(|e| e.to_string())?;

        let mut sections = Vec::with_capacity(load_order.len() + 1);
        for dep_name in &load_order {
            if let Some(def) = self.catalog.find(dep_name) {
                sections.push(format!("# Dependency: {}\n\n{}", def.name, def.content.trim()));
            }
        }
        let def = self
            .catalog
            .find(name)
            .ok_or_else(|| format!("no agent definition named '{name}'"))?;
        sections.push(format!("# Agent: {}\n\n{}", def.name, def.content.trim()));

        Ok(sections.join("\n\n---\n\n"))
    }
}

#[async_trait]
impl Tool for RunAgentTool {
    fn name(&self) -> &str {
        "run_agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent running a specific discovered agent definition by name. \
         The definition's own instructions (and those of its resolved dependencies, \
         loaded first) become the sub-agent's system prompt. Use `resolve_dependencies` \
         or `dependency_graph` first if you need to see what an agent depends on. \
         Maximum nesting depth is 3, shared with `task`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the discovered agent definition to run"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task to hand to the agent"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["name", "prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = match call.args.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'name'"),
        };
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        let system_prompt = match self.build_system_prompt(&name) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(agent = %name, depth = current_depth + 1, "run_agent: spawning sub-agent");

        let mut sub_config: AgentConfig = self.config.agent.clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));
        let profile = ToolSetProfile::SubAgent { todos };

        let mode_lock = Arc::new(Mutex::new(adk_config::AgentMode::Agent));
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        let tools = Arc::new(build_tool_registry(
            &self.config,
            self.model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            AgentRuntimeContext::default(),
        ));

        let mut runtime = self.sub_agent_runtime.clone();
        runtime.system_prompt_override = Some(system_prompt);

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
            runtime,
            mode_lock,
            tool_event_rx,
            128_000,
        )
        .with_context_budget(ContextBudget::from(&self.config.tools.context));

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        let submit_result = agent.submit(&prompt, tx).await;

        let mut output = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::TextDelta(delta) = event {
                output.push_str(&delta);
            }
        }

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, format!("('{name}' produced no text output)"))
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("'{name}' sub-agent error: {e}")),
        }
    }
}
