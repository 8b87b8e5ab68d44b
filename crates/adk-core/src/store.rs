// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Storage-backend interface for conversation sessions.
//!
//! This is an interface-only module: `adk-core` depends on [`SessionStore`]
//! and nothing else, so the turn loop and compaction logic never need to
//! know whether a session lives on disk as markdown, in a database, or in
//! memory for a test. Frontends (`adk-ci`, `adk-tui`) already have working
//! file-based implementations (`adk_input::history`); they adapt those to
//! this trait rather than adk-core growing a filesystem dependency.

use async_trait::async_trait;
use adk_model::Message;

use crate::session::Session;

/// Failure modes a [`SessionStore`] implementation can report. Deliberately
/// small — persistence errors are treated as fatal by the turn loop (per
/// the teacher's existing error-propagation policy), so callers don't need
/// fine-grained recovery branches.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Summary metadata for [`SessionStore::list`], independent of any one
/// backend's file-naming scheme.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub turns: usize,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Backend-agnostic persistence for conversation sessions.
///
/// Implementations must be `Send + Sync` so a store can be shared behind an
/// `Arc` across the turn loop and any frontend polling `list()` concurrently
/// (e.g. a TUI history pane refreshing while a turn is in flight).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load an existing session by id, or create a fresh empty one if no
    /// such id exists yet.
    async fn load_or_create(&self, id: &str) -> Result<Session, StoreError>;

    /// Append messages to the end of an existing session's history.
    async fn append(&self, id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// Replace the stored history wholesale (used after compaction or an
    /// edit-and-resubmit, where the message list is rebuilt rather than
    /// extended).
    async fn replace_range(&self, id: &str, messages: Vec<Message>) -> Result<(), StoreError>;

    /// List known sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Permanently remove a session.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal in-memory store used to exercise the trait's contract —
    /// mirrors the shape a test double for any real backend would take.
    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<String, Vec<Message>>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn load_or_create(&self, id: &str) -> Result<Session, StoreError> {
            let mut guard = self.sessions.lock().unwrap();
            let messages = guard.entry(id.to_string()).or_default().clone();
            let mut session = Session::new(100_000);
            session.id = id.to_string();
            session.push_many(messages);
            Ok(session)
        }

        async fn append(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
            let mut guard = self.sessions.lock().unwrap();
            guard
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?
                .extend_from_slice(messages);
            Ok(())
        }

        async fn replace_range(&self, id: &str, messages: Vec<Message>) -> Result<(), StoreError> {
            let mut guard = self.sessions.lock().unwrap();
            guard.insert(id.to_string(), messages);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
            let guard = self.sessions.lock().unwrap();
            Ok(guard
                .iter()
                .map(|(id, msgs)| SessionSummary {
                    id: id.clone(),
                    title: id.clone(),
                    turns: msgs.len(),
                    updated_at: chrono::Utc::now(),
                })
                .collect())
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            let mut guard = self.sessions.lock().unwrap();
            guard
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn load_or_create_returns_empty_session_for_unknown_id() {
        let store = MemoryStore::default();
        let session = store.load_or_create("new").await.unwrap();
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn append_then_load_returns_appended_messages() {
        let store = MemoryStore::default();
        store.load_or_create("s1").await.unwrap();
        store.append("s1", &[Message::user("hi")]).await.unwrap();
        let session = store.load_or_create("s1").await.unwrap();
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn append_to_unknown_session_is_not_found() {
        let store = MemoryStore::default();
        let err = store.append("missing", &[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn replace_range_overwrites_history() {
        let store = MemoryStore::default();
        store.load_or_create("s1").await.unwrap();
        store.append("s1", &[Message::user("a"), Message::user("b")]).await.unwrap();
        store.replace_range("s1", vec![Message::user("only")]).await.unwrap();
        let session = store.load_or_create("s1").await.unwrap();
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = MemoryStore::default();
        store.load_or_create("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        let err = store.delete("s1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_reflects_created_sessions() {
        let store = MemoryStore::default();
        store.load_or_create("s1").await.unwrap();
        store.load_or_create("s2").await.unwrap();
        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
    }
}
