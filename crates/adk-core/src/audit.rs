// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Hash-chained, append-only audit log.
//!
//! Every tool call, model turn boundary, and error surfaced through the
//! event bus is also recorded here as an [`AuditEntry`]. Each entry's hash
//! covers the previous entry's hash, so truncating or editing history
//! breaks the chain and is detectable by [`AuditLog::verify`]. Entries never
//! carry raw credential values — any env var matching
//! [`adk_sandbox`]'s secret-suffix convention is masked to `[REDACTED]`
//! before being written in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

/// Suffixes marking an env var / JSON field name as secret, reused from
/// the sandbox's credential-masking convention so audit records never leak
/// what sandboxed tool output already redacts.
pub const SECRET_KEY_SUFFIXES: &[&str] =
    &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD", "_CREDENTIAL"];

/// What kind of thing happened, for filtering/search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditKind {
    TurnStarted,
    TurnComplete,
    ToolCallStarted,
    ToolCallFinished,
    /// A tool call's arguments or result touched a value matching
    /// [`SECRET_KEY_SUFFIXES`] — the `detail` still carries `[REDACTED]` in
    /// place of the value, but the event itself is recorded so access to
    /// credential-shaped data is never silent.
    CredentialAccess,
    Error,
    ContextCompacted,
    ModeChanged,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub session_id: String,
    /// Free-form JSON payload (tool name/args, error message, token counts).
    /// Secret-looking values have already been redacted before this point.
    pub detail: serde_json::Value,
    /// SHA-256 of the previous entry's `entry_hash` (or [`GENESIS_HASH`] for
    /// the first entry).
    pub prev_hash: String,
    /// SHA-256 over `(prev_hash, sequence, kind, session_id, detail)`.
    pub entry_hash: String,
}

fn hash_entry(
    prev_hash: &str,
    sequence: u64,
    kind: &AuditKind,
    session_id: &str,
    detail: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(format!("{kind:?}").as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.update(detail.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Does `value` contain any object key matching [`SECRET_KEY_SUFFIXES`]
/// (case-insensitive), recursively? Used to decide whether a tool call's
/// arguments or result warrant a [`AuditKind::CredentialAccess`] entry in
/// addition to the usual tool_call / tool_result entries.
pub fn contains_secret_field(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => map.iter().any(|(k, v)| {
            let upper = k.to_uppercase();
            SECRET_KEY_SUFFIXES.iter().any(|s| upper.ends_with(s)) || contains_secret_field(v)
        }),
        serde_json::Value::Array(items) => items.iter().any(contains_secret_field),
        _ => false,
    }
}

/// Mask any object field whose key matches [`SECRET_KEY_SUFFIXES`]
/// (case-insensitive) with `"[REDACTED]"`. Applied recursively so nested
/// tool-call argument objects are covered.
pub fn redact_detail(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let upper = k.to_uppercase();
                    if SECRET_KEY_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
                        (k, serde_json::Value::String("[REDACTED]".to_string()))
                    } else {
                        (k, redact_detail(v))
                    }
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(redact_detail).collect())
        }
        other => other,
    }
}

/// In-memory, append-only, hash-chained audit log for a single session.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append a new entry, redacting `detail` and chaining its hash off the
    /// previous entry (or the genesis hash if this is the first one).
    pub fn append(
        &mut self,
        session_id: impl Into<String>,
        kind: AuditKind,
        detail: serde_json::Value,
    ) -> &AuditEntry {
        let sequence = self.entries.len() as u64;
        let prev_hash = self
            .entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let session_id = session_id.into();
        let detail = redact_detail(detail);
        let entry_hash = hash_entry(&prev_hash, sequence, &kind, &session_id, &detail);

        self.entries.push(AuditEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
            session_id,
            detail,
            prev_hash,
            entry_hash,
        });
        self.entries.last().unwrap()
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute every entry's hash from its fields and confirm it both
    /// matches the stored `entry_hash` and chains correctly off the
    /// previous entry. Returns the index of the first broken entry, if any.
    pub fn verify(&self) -> Result<(), usize> {
        let mut expected_prev = GENESIS_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.prev_hash != expected_prev {
                return Err(i);
            }
            let recomputed = hash_entry(
                &entry.prev_hash,
                entry.sequence,
                &entry.kind,
                &entry.session_id,
                &entry.detail,
            );
            if recomputed != entry.entry_hash {
                return Err(i);
            }
            expected_prev = entry.entry_hash.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_entry_chains_off_genesis_hash() {
        let mut log = AuditLog::new();
        log.append("s1", AuditKind::TurnStarted, json!({}));
        assert_eq!(log.entries()[0].prev_hash, GENESIS_HASH);
    }

    #[test]
    fn second_entry_chains_off_first_entry_hash() {
        let mut log = AuditLog::new();
        log.append("s1", AuditKind::TurnStarted, json!({}));
        log.append("s1", AuditKind::TurnComplete, json!({}));
        assert_eq!(log.entries()[1].prev_hash, log.entries()[0].entry_hash);
    }

    #[test]
    fn verify_passes_on_untampered_log() {
        let mut log = AuditLog::new();
        log.append("s1", AuditKind::ToolCallStarted, json!({"tool": "shell"}));
        log.append("s1", AuditKind::ToolCallFinished, json!({"tool": "shell"}));
        assert_eq!(log.verify(), Ok(()));
    }

    #[test]
    fn verify_detects_tampered_detail() {
        let mut log = AuditLog::new();
        log.append("s1", AuditKind::ToolCallStarted, json!({"tool": "shell"}));
        log.entries[0].detail = json!({"tool": "rm -rf /"});
        assert_eq!(log.verify(), Err(0));
    }

    #[test]
    fn verify_detects_broken_chain_link() {
        let mut log = AuditLog::new();
        log.append("s1", AuditKind::TurnStarted, json!({}));
        log.append("s1", AuditKind::TurnComplete, json!({}));
        log.entries[1].prev_hash = "deadbeef".repeat(8);
        assert_eq!(log.verify(), Err(1));
    }

    #[test]
    fn redact_masks_api_key_suffixed_fields() {
        let detail = json!({ "GITHUB_TOKEN": "ghp_supersecret", "path": "/tmp/x" });
        let redacted = redact_detail(detail);
        assert_eq!(redacted["GITHUB_TOKEN"], json!("[REDACTED]"));
        assert_eq!(redacted["path"], json!("/tmp/x"));
    }

    #[test]
    fn redact_recurses_into_nested_objects() {
        let detail = json!({ "args": { "DB_PASSWORD": "hunter2" } });
        let redacted = redact_detail(detail);
        assert_eq!(redacted["args"]["DB_PASSWORD"], json!("[REDACTED]"));
    }

    #[test]
    fn contains_secret_field_detects_top_level_key() {
        let detail = json!({ "AWS_SECRET": "xxxx", "path": "/tmp" });
        assert!(contains_secret_field(&detail));
    }

    #[test]
    fn contains_secret_field_detects_nested_key() {
        let detail = json!({ "args": { "API_TOKEN": "xxxx" } });
        assert!(contains_secret_field(&detail));
    }

    #[test]
    fn contains_secret_field_false_for_plain_data() {
        let detail = json!({ "command": "ls", "path": "/tmp" });
        assert!(!contains_secret_field(&detail));
    }

    #[test]
    fn append_returns_reference_to_new_entry() {
        let mut log = AuditLog::new();
        let entry = log.append("s1", AuditKind::Error, json!({"message": "boom"}));
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.kind, AuditKind::Error);
    }
}
