// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fingerprint cache for agent-as-tool invocations.
//!
//! A fingerprint identifies the "shape" of a sub-agent run — its system
//! prompt, the names of the tools it had available, and the user turn text
//! — so that a repeated `run_agent` call with an identical shape can reuse a
//! cached result instead of paying for another model round-trip. The cache
//! is invalidated wholesale on registry reload; there is no TTL or
//! memory-pressure eviction.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Opaque content-addressed identity of an agent invocation's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `(system_prompt, tool_names, user_turn)`.
    /// `tool_names` is sorted before hashing so descriptor iteration order
    /// never affects the result.
    pub fn compute(system_prompt: &str, tool_names: &[String], user_turn: &str) -> Self {
        let mut sorted = tool_names.to_vec();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(system_prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(sorted.join(",").as_bytes());
        hasher.update([0u8]);
        hasher.update(user_turn.as_bytes());

        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-memory cache of agent-invocation results keyed by [`Fingerprint`].
///
/// Not thread-safe by itself; callers needing concurrent access wrap it in
/// a `tokio::sync::Mutex` (mirroring how `adk-mcp-client` guards its
/// sessions).
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<Fingerprint, String>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<&str> {
        self.entries.get(fp).map(|s| s.as_str())
    }

    pub fn insert(&mut self, fp: Fingerprint, result: String) {
        self.entries.insert(fp, result);
    }

    /// Drop every cached entry. Called when the agent-definition registry
    /// reloads, since a changed definition invalidates any prior result
    /// computed under its old shape.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
