// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapts the markdown-file conversation history already used by `adk-ci`
//! and `adk-tui` (`adk_input::history`) to `adk-core`'s backend-agnostic
//! [`SessionStore`] trait.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use adk_core::store::{SessionStore, SessionSummary, StoreError};
use adk_core::Session;
use adk_input::{history, serialize_conversation};
use adk_model::Message;

fn to_backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// [`SessionStore`] backed by the `~/.local/share/adk/history` markdown
/// files `adk_input::history` already reads and writes. Each session's id
/// is the file stem `history::resolve` accepts — a timestamp prefix, a
/// `<timestamp>_<slug>` stem, or a path.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryStore;

impl HistoryStore {
    pub fn new() -> Self {
        Self
    }

    fn file_path(id: &str) -> PathBuf {
        history::history_dir().join(format!("{id}.md"))
    }
}

#[async_trait]
impl SessionStore for HistoryStore {
    async fn load_or_create(&self, id: &str) -> Result<Session, StoreError> {
        let id = id.to_string();
        tokio::task::spawn_blocking(move || match history::load(&id) {
            Ok((parsed, _path)) => {
                let mut session = Session::new(100_000);
                session.id = id;
                session.push_many(parsed.history);
                Ok(session)
            }
            Err(_) => {
                let mut session = Session::new(100_000);
                session.id = id;
                Ok(session)
            }
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn append(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let id = id.to_string();
        let messages = messages.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            match history::resolve(&id) {
                Ok(_) => {
                    let (mut parsed, path) =
                        history::load(&id).map_err(to_backend)?;
                    parsed.history.extend(messages);
                    history::save_to(&path, &parsed.history).map_err(to_backend)
                }
                Err(_) => {
                    history::ensure_history_dir().map_err(to_backend)?;
                    let path = HistoryStore::file_path(&id);
                    let content = serialize_conversation(None, &messages);
                    fs::write(&path, content)
                        .map_err(|e| StoreError::Backend(e.to_string()))
                }
            }
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn replace_range(&self, id: &str, messages: Vec<Message>) -> Result<(), StoreError> {
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let path = history::resolve(&id).map_err(|_| StoreError::NotFound(id.clone()))?;
            history::save_to(&path, &messages).map_err(to_backend)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        tokio::task::spawn_blocking(|| -> Result<Vec<SessionSummary>, StoreError> {
            let entries = history::list(None).map_err(to_backend)?;
            Ok(entries
                .into_iter()
                .map(|e| SessionSummary {
                    id: e.id,
                    title: e.title,
                    turns: e.turns,
                    updated_at: parse_timestamp(&e.timestamp),
                })
                .collect())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let path = history::resolve(&id).map_err(|_| StoreError::NotFound(id.clone()))?;
            fs::remove_file(&path).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

/// Parses `history::HistoryEntry::timestamp` (the `%Y-%m-%dT%H-%M-%SZ`
/// filename prefix `history::make_filename` writes). Falls back to "now"
/// for malformed or user-renamed files rather than failing `list()`.
fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H-%M-%SZ")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or_else(|_| Utc::now())
}
