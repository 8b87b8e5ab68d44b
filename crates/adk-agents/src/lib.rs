// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-definition discovery, dependency resolution, and load planning.
//!
//! An agent definition is a Markdown file with YAML frontmatter declaring a
//! name, description, semantic version, kind (`subagent`, `skill`, or
//! `command`), and optionally a list of other definitions it depends on.
//! This crate discovers definitions across layered search paths (plugin,
//! user, project — in increasing precedence), resolves the dependency
//! graph those definitions declare, and produces a deterministic load
//! order.
//!
//! ```no_run
//! let catalog = adk_agents::AgentCatalog::discover(None, &[]);
//! for warning in &catalog.result.warnings {
//!     eprintln!("skipped: {}", warning.message);
//! }
//! let load_order = catalog.graph().unwrap().resolve().unwrap();
//! ```

pub mod definition;
pub mod discovery;
pub mod graph;
pub mod lint;
pub mod version;

pub use definition::{AgentDefinition, AgentKind, AgentSource, DefinitionError, DepConstraint, Requirements};
pub use discovery::{discover, DiscoveryResult, DiscoveryWarning, MAX_DEFINITION_FILE_BYTES};
pub use graph::{DependencyGraph, GraphError};
pub use lint::{lint, LintIssue};
pub use version::{ConstraintError, VersionConstraint};

use std::path::{Path, PathBuf};

/// A discovered, lintable set of agent definitions, ready for dependency
/// resolution.
///
/// This is the crate's main entry point: call [`AgentCatalog::discover`]
/// once per reload, then use [`AgentCatalog::graph`] to get a load plan and
/// [`AgentCatalog::lints`] to surface advisory warnings.
pub struct AgentCatalog {
    pub result: DiscoveryResult,
}

impl AgentCatalog {
    pub fn discover(project_root: Option<&Path>, plugin_roots: &[PathBuf]) -> Self {
        Self {
            result: discovery::discover(project_root, plugin_roots),
        }
    }

    pub fn definitions(&self) -> &[AgentDefinition] {
        &self.result.definitions
    }

    pub fn find(&self, name: &str) -> Option<&AgentDefinition> {
        self.result.definitions.iter().find(|d| d.name == name)
    }

    /// Build the dependency graph over the discovered definitions.
    pub fn graph(&self) -> Result<DependencyGraph<'_>, GraphError> {
        DependencyGraph::build(&self.result.definitions)
    }

    /// Run advisory lint checks (shadowing, short descriptions, unresolved
    /// dependencies) over the discovered definitions.
    pub fn lints(&self) -> Vec<LintIssue> {
        lint::lint(&self.result.definitions, &self.result.candidates)
    }
}
