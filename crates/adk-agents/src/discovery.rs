// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-definition discovery across layered search paths.
//!
//! Discovery order, lowest to highest precedence:
//!
//! ```text
//! <plugin_root>/agents/     (plugin)
//! ~/.adk/agents/            (user)
//! <project>/.adk/agents/    (project)
//! ```
//!
//! Higher-precedence sources overwrite same-named definitions from
//! lower-precedence ones. Within a source, `.md` files are walked
//! recursively so definitions can be grouped into subdirectories.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::definition::{parse_definition, AgentDefinition, AgentKind, AgentSource, DefinitionError};

/// Oversized definition files are skipped rather than rejected outright —
/// consistent with the size cap subagent loading uses elsewhere in this
/// workspace.
pub const MAX_DEFINITION_FILE_BYTES: u64 = 256 * 1024;

/// A non-fatal problem surfaced during discovery: the offending file is
/// skipped but discovery otherwise continues.
#[derive(Debug, Clone)]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub message: String,
}

/// The result of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub definitions: Vec<AgentDefinition>,
    pub warnings: Vec<DiscoveryWarning>,
    /// Every `(name, source)` pair seen across all search paths, including
    /// ones later overwritten by a higher-precedence source. Feeds
    /// [`crate::lint::lint`]'s shadowing check.
    pub candidates: Vec<(String, AgentSource)>,
}

/// Discover agent definitions from the standard search paths plus any
/// explicit plugin roots.
///
/// `project_root` defaults to the current working directory when `None`.
pub fn discover(project_root: Option<&Path>, plugin_roots: &[PathBuf]) -> DiscoveryResult {
    let mut map: HashMap<String, AgentDefinition> = HashMap::new();
    let mut warnings = Vec::new();
    let mut candidates = Vec::new();

    for root in plugin_roots {
        scan_into(&root.join("agents"), AgentSource::Plugin, &mut map, &mut warnings, &mut candidates);
    }

    if let Some(home) = dirs::home_dir() {
        scan_into(
            &home.join(".adk").join("agents"),
            AgentSource::User,
            &mut map,
            &mut warnings,
            &mut candidates,
        );
    }

    let project_root = project_root
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    scan_into(
        &project_root.join(".adk").join("agents"),
        AgentSource::Project,
        &mut map,
        &mut warnings,
        &mut candidates,
    );

    let mut definitions: Vec<AgentDefinition> = map.into_values().collect();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    DiscoveryResult { definitions, warnings, candidates }
}

fn scan_into(
    dir: &Path,
    source: AgentSource,
    map: &mut HashMap<String, AgentDefinition>,
    warnings: &mut Vec<DiscoveryWarning>,
    candidates: &mut Vec<(String, AgentSource)>,
) {
    for path in enumerate_md_files(dir) {
        match load_one(&path, source) {
            Ok(def) => {
                candidates.push((def.name.clone(), source));
                map.insert(def.name.clone(), def);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping agent definition");
                warnings.push(DiscoveryWarning {
                    path,
                    message: e.to_string(),
                });
            }
        }
    }
}

fn load_one(path: &Path, source: AgentSource) -> Result<AgentDefinition, DefinitionError> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_DEFINITION_FILE_BYTES {
        return Err(DefinitionError::InvalidAgent {
            path: path.display().to_string(),
            reason: format!("file size {size} exceeds cap of {MAX_DEFINITION_FILE_BYTES} bytes"),
        });
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");
    let default_kind = default_kind_for(path);

    let raw = fs::read_to_string(path).map_err(|e| DefinitionError::InvalidAgent {
        path: path.display().to_string(),
        reason: format!("failed to read file: {e}"),
    })?;

    parse_definition(&raw, stem, path, source, default_kind)
}

/// Definitions placed under a `commands/` directory default to
/// [`AgentKind::Command`]; those under `skills/` default to
/// [`AgentKind::Skill`]; everything else defaults to [`AgentKind::Subagent`].
fn default_kind_for(path: &Path) -> AgentKind {
    let has_component = |name: &str| path.components().any(|c| c.as_os_str() == name);
    if has_component("commands") {
        AgentKind::Command
    } else if has_component("skills") {
        AgentKind::Skill
    } else {
        AgentKind::Subagent
    }
}

fn enumerate_md_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    enumerate_md_files_into(dir, &mut out);
    out.sort();
    out
}

fn enumerate_md_files_into(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            enumerate_md_files_into(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
}
