// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Declarative pre-invocation constraints on destructive tools.
//!
//! A [`Safeguard`] describes a check that must pass *before* a tool performs
//! any side effect. Unlike [`crate::policy::ApprovalPolicy`] (which asks "may
//! this tool run at all"), safeguards ask "given that it may run, is this
//! particular call safe". Enforcement never partially applies a write: either
//! every declared safeguard passes, or nothing touches disk.

use std::path::{Path, PathBuf};

/// A single declared constraint a tool promises to enforce before any side
/// effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Safeguard {
    /// Refuse a replacement/write whose new content is empty when the
    /// intent was an edit rather than a deletion.
    RefuseEmptyReplacement,
    /// Refuse to touch a path that canonicalizes outside the workspace
    /// root (including via a symlink).
    RequirePathInsideWorkspace,
    /// Refuse a write whose payload exceeds this many bytes.
    MaxBytesWritten(u64),
    /// Refuse a patch/edit whose replacement count exceeds this bound.
    MaxReplacements(usize),
}

/// Why a [`Safeguard`] refused a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeguardViolation {
    pub safeguard: Safeguard,
    pub message: String,
}

impl std::fmt::Display for SafeguardViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SafeguardViolation {}

/// The facts a safeguard needs to decide whether a call is safe. Tools
/// populate only the fields relevant to the safeguards they declare.
#[derive(Debug, Default)]
pub struct SafeguardContext<'a> {
    pub path: Option<&'a Path>,
    pub workspace_root: Option<&'a Path>,
    pub new_content: Option<&'a str>,
    pub byte_len: Option<u64>,
    pub replacement_count: Option<usize>,
}

/// Default cap for [`Safeguard::MaxBytesWritten`] when a tool does not
/// declare a tighter one: 64 MiB.
pub const DEFAULT_MAX_BYTES_WRITTEN: u64 = 64 * 1024 * 1024;

/// Workspace root from `ADK_WORKSPACE`, if set. Filesystem tools consult
/// this to populate [`SafeguardContext::workspace_root`]; when unset, the
/// `RequirePathInsideWorkspace` safeguard is a no-op, matching a single-root
/// CLI invocation with no declared workspace.
pub fn workspace_root() -> Option<PathBuf> {
    std::env::var_os("ADK_WORKSPACE").map(PathBuf::from)
}

/// Check every declared safeguard against `ctx`, stopping at the first
/// violation. Returns `Ok(())` iff the caller may proceed with the side
/// effect.
pub fn enforce(safeguards: &[Safeguard], ctx: &SafeguardContext<'_>) -> Result<(), SafeguardViolation> {
    for sg in safeguards {
        check_one(sg, ctx)?;
    }
    Ok(())
}

fn check_one(sg: &Safeguard, ctx: &SafeguardContext<'_>) -> Result<(), SafeguardViolation> {
    match sg {
        Safeguard::RefuseEmptyReplacement => {
            if let Some(content) = ctx.new_content {
                if content.is_empty() {
                    return Err(SafeguardViolation {
                        safeguard: sg.clone(),
                        message: "refuse to write empty replacement; use edit_lines with mode=delete".into(),
                    });
                }
            }
            Ok(())
        }
        Safeguard::RequirePathInsideWorkspace => {
            let (Some(path), Some(root)) = (ctx.path, ctx.workspace_root) else {
                return Ok(());
            };
            match path_is_inside(path, root) {
                Ok(true) => Ok(()),
                Ok(false) => Err(SafeguardViolation {
                    safeguard: sg.clone(),
                    message: format!(
                        "path {} escapes workspace root {}",
                        path.display(),
                        root.display()
                    ),
                }),
                Err(e) => Err(SafeguardViolation {
                    safeguard: sg.clone(),
                    message: format!("could not resolve path {}: {e}", path.display()),
                }),
            }
        }
        Safeguard::MaxBytesWritten(limit) => {
            if let Some(len) = ctx.byte_len {
                if len > *limit {
                    return Err(SafeguardViolation {
                        safeguard: sg.clone(),
                        message: format!("write of {len} bytes exceeds the {limit}-byte limit"),
                    });
                }
            }
            Ok(())
        }
        Safeguard::MaxReplacements(limit) => {
            if let Some(count) = ctx.replacement_count {
                if count > *limit {
                    return Err(SafeguardViolation {
                        safeguard: sg.clone(),
                        message: format!("{count} replacements exceeds the {limit}-replacement limit"),
                    });
                }
            }
            Ok(())
        }
    }
}

/// Resolve `path` against `root` without requiring either to exist yet:
/// canonicalize the deepest existing ancestor, then re-append the
/// non-existent tail, so a write to a not-yet-created file is still checked
/// for workspace containment and symlink escape via its existing parents.
fn path_is_inside(path: &Path, root: &Path) -> std::io::Result<bool> {
    let root = dunce_canonicalize(root)?;
    let resolved = resolve_existing_prefix(path)?;
    Ok(resolved.starts_with(&root))
}

fn dunce_canonicalize(p: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(p)
}

fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut existing = path.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match std::fs::canonicalize(&existing) {
            Ok(canon) => {
                let mut result = canon;
                for component in tail.into_iter().rev() {
                    result.push(component);
                }
                return Ok(result);
            }
            Err(_) => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    // Reached root without finding an existing ancestor; the
                    // root itself is assumed to exist.
                    return Ok(path);
                };
                tail.push(name);
                if !existing.pop() {
                    return Ok(path);
                }
            }
        }
    }
}
