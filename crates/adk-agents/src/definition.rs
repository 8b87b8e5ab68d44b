// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-definition file parsing.
//!
//! An agent definition is a Markdown file with YAML frontmatter, the same
//! shape subagent files use elsewhere in this workspace, extended with a
//! `version`, a `type`, and a `dependencies` list so definitions can declare
//! what else they need loaded alongside them.
//!
//! ```markdown
//! ---
//! name: security-auditor
//! description: Security specialist for auth and sensitive-data changes.
//! version: 1.2.0
//! type: subagent
//! dependencies:
//!   - name: code-search
//!     version: "^1.0.0"
//! requirements:
//!   timeout_s: 120
//!   memory_mb: 512
//! ---
//!
//! You are a security expert auditing code for vulnerabilities.
//! ```

use std::path::{Path, PathBuf};

use semver::Version;
use serde::Deserialize;
use thiserror::Error;

use crate::version::{parse_agent_version, ConstraintError, VersionConstraint};

/// Where an agent definition was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    Project,
    User,
    Plugin,
}

impl std::fmt::Display for AgentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Project => "project",
            Self::User => "user",
            Self::Plugin => "plugin",
        };
        f.write_str(s)
    }
}

/// The closed set of agent-definition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Subagent,
    Skill,
    Command,
}

/// A single dependency declaration: another agent's name plus the version
/// constraint it must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepConstraint {
    pub name: String,
    pub constraint: String,
}

/// Optional execution requirements an agent declares for itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A fully parsed, validated agent definition.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub version: Version,
    pub kind: AgentKind,
    pub source: AgentSource,
    pub path: PathBuf,
    pub dependencies: Vec<DepConstraint>,
    pub requirements: Requirements,
    pub content: String,
    pub raw_yaml: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("{path}: no YAML frontmatter found")]
    NoFrontmatter { path: String },
    #[error("{path}: invalid YAML frontmatter: {source}")]
    InvalidYaml { path: String, source: String },
    #[error("{path}: invalid agent definition: {reason}")]
    InvalidAgent { path: String, reason: String },
    #[error("{path}: invalid version '{raw}': {source}")]
    InvalidVersion {
        path: String,
        raw: String,
        source: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawDependency {
    name: String,
    #[serde(rename = "version", alias = "constraint")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "type")]
    kind: Option<AgentKind>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    requirements: Requirements,
}

/// Parse one agent-definition file's raw text.
///
/// `default_kind` is used when the frontmatter omits `type` — definitions
/// discovered under a `commands/` directory default to [`AgentKind::Command`],
/// for instance.
pub fn parse_definition(
    raw: &str,
    stem: &str,
    path: &Path,
    source: AgentSource,
    default_kind: AgentKind,
) -> Result<AgentDefinition, DefinitionError> {
    let path_str = path.display().to_string();
    let rest = raw.trim_start_matches('\n');

    let after_open = rest.strip_prefix("---").ok_or_else(|| DefinitionError::NoFrontmatter {
        path: path_str.clone(),
    })?;
    let close = after_open.find("\n---").ok_or_else(|| DefinitionError::NoFrontmatter {
        path: path_str.clone(),
    })?;
    let yaml_block = &after_open[..close];
    let content = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: AgentFrontmatter = serde_yaml::from_str(yaml_block).map_err(|e| DefinitionError::InvalidYaml {
        path: path_str.clone(),
        source: e.to_string(),
    })?;

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    let description = fm.description.filter(|d| !d.trim().is_empty()).ok_or_else(|| {
        DefinitionError::InvalidAgent {
            path: path_str.clone(),
            reason: "missing description".to_string(),
        }
    })?;

    let version_raw = fm.version.unwrap_or_else(|| "0.1.0".to_string());
    let version = parse_agent_version(&version_raw).map_err(|e| match e {
        ConstraintError::InvalidVersion(raw, source) => DefinitionError::InvalidVersion {
            path: path_str.clone(),
            raw,
            source,
        },
        other => DefinitionError::InvalidVersion {
            path: path_str.clone(),
            raw: version_raw.clone(),
            source: other.to_string(),
        },
    })?;

    let kind = fm.kind.unwrap_or(default_kind);

    let mut dependencies = Vec::with_capacity(fm.dependencies.len());
    for dep in fm.dependencies {
        // Validate constraint syntax eagerly so a malformed dependency is
        // rejected at load time, not deep inside graph resolution.
        VersionConstraint::parse(&dep.version).map_err(|e| DefinitionError::InvalidAgent {
            path: path_str.clone(),
            reason: format!("dependency '{}' has invalid constraint '{}': {e}", dep.name, dep.version),
        })?;
        dependencies.push(DepConstraint {
            name: dep.name,
            constraint: dep.version,
        });
    }

    Ok(AgentDefinition {
        name,
        description,
        version,
        kind,
        source,
        path: path.to_path_buf(),
        dependencies,
        requirements: fm.requirements,
        content,
        raw_yaml: yaml_block.to_string(),
    })
}
