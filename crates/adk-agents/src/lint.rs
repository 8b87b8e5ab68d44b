// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Advisory lint checks over a set of discovered agent definitions.
//!
//! Lints never block loading — discovery already resolved name collisions
//! by precedence — but they surface situations worth a human's attention:
//! a definition shadowed by a higher-precedence source, a description too
//! short to be useful for delegation, or a dependency on a name that isn't
//! present in this definition set.

use crate::definition::{AgentDefinition, AgentSource};

/// Descriptions shorter than this are flagged as unlikely to help automatic
/// delegation decide when to use the agent.
pub const MIN_DESCRIPTION_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintIssue {
    ShadowedByHigherPrecedence { name: String, shadowed_source: String, winning_source: String },
    DescriptionTooShort { name: String, len: usize },
    UnresolvedDependency { name: String, dependency: String },
}

impl std::fmt::Display for LintIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShadowedByHigherPrecedence { name, shadowed_source, winning_source } => write!(
                f,
                "'{name}' defined in {shadowed_source} is shadowed by the {winning_source} definition"
            ),
            Self::DescriptionTooShort { name, len } => write!(
                f,
                "'{name}' has a {len}-character description, too short to guide delegation"
            ),
            Self::UnresolvedDependency { name, dependency } => {
                write!(f, "'{name}' depends on '{dependency}', which is not defined")
            }
        }
    }
}

/// Run all lint checks against a discovered definition set.
///
/// `all_candidates` is every `(name, source)` pair seen before
/// overwrite-by-precedence collapsed same-named definitions to one — see
/// [`crate::discovery::DiscoveryResult::candidates`].
pub fn lint(definitions: &[AgentDefinition], all_candidates: &[(String, AgentSource)]) -> Vec<LintIssue> {
    let mut issues = Vec::new();

    for def in definitions {
        if def.description.trim().len() < MIN_DESCRIPTION_LEN {
            issues.push(LintIssue::DescriptionTooShort {
                name: def.name.clone(),
                len: def.description.trim().len(),
            });
        }
        for dep in &def.dependencies {
            if !definitions.iter().any(|d| d.name == dep.name) {
                issues.push(LintIssue::UnresolvedDependency {
                    name: def.name.clone(),
                    dependency: dep.name.clone(),
                });
            }
        }
    }

    let mut by_name: std::collections::HashMap<&str, Vec<AgentSource>> = std::collections::HashMap::new();
    for (name, source) in all_candidates {
        by_name.entry(name.as_str()).or_default().push(*source);
    }
    for (name, sources) in by_name {
        if sources.len() > 1 {
            let winning = definitions.iter().find(|d| d.name == name).map(|d| d.source);
            if let Some(winning_source) = winning {
                for source in sources {
                    if source != winning_source {
                        issues.push(LintIssue::ShadowedByHigherPrecedence {
                            name: name.to_string(),
                            shadowed_source: source.to_string(),
                            winning_source: winning_source.to_string(),
                        });
                    }
                }
            }
        }
    }

    issues
}
