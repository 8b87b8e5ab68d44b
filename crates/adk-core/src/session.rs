// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use adk_config::ContextConfig;
use adk_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// A single addressable unit of conversation history, tracked alongside the
/// flat `Vec<Message>` the model API consumes. `parent_id` links a tool
/// result back to the call that produced it (or an edited turn back to the
/// turn it replaced), giving compaction and history editing something to
/// walk without re-parsing message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
    pub payload: Message,
}

impl ConversationItem {
    pub fn new(payload: Message, parent_id: Option<Uuid>) -> Self {
        let token_count = payload.approx_tokens();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            timestamp: Utc::now(),
            token_count,
            payload,
        }
    }
}

/// Token-budget thresholds threaded through a [`Session`], mirroring
/// `adk_config::ContextConfig` so the session manager doesn't need to reach
/// back into config at every check.
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub compaction_threshold: f32,
    pub truncation_bytes: usize,
    pub truncation_lines: usize,
    pub head_lines: usize,
    pub tail_lines: usize,
}

impl From<&ContextConfig> for ContextBudget {
    fn from(cfg: &ContextConfig) -> Self {
        Self {
            compaction_threshold: cfg.compaction_threshold,
            truncation_bytes: cfg.truncation_bytes,
            truncation_lines: cfg.truncation_lines,
            head_lines: cfg.head_lines,
            tail_lines: cfg.tail_lines,
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            compaction_threshold: 0.70,
            truncation_bytes: 10_240,
            truncation_lines: 256,
            head_lines: 128,
            tail_lines: 128,
        }
    }
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Parallel item-level history; kept in lockstep with `messages` by
    /// `push`/`push_many`/`replace_messages`. Not consulted by the
    /// streaming hot path, which stays on the flat `Vec<Message>`.
    pub items: Vec<ConversationItem>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    pub budget: ContextBudget,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            items: Vec::new(),
            token_count: 0,
            max_tokens,
            budget: ContextBudget::default(),
        }
    }

    pub fn with_budget(max_tokens: usize, budget: ContextBudget) -> Self {
        Self { budget, ..Self::new(max_tokens) }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.items.push(ConversationItem::new(msg.clone(), self.items.last().map(|i| i.id)));
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Pushes a message whose prompt-facing projection differs from what is
    /// kept for audit — e.g. a truncated tool result. `full` is recorded in
    /// `items` (and its token count charged against the budget); `projected`
    /// is what the model actually sees in `messages`.
    pub fn push_projected(&mut self, full: Message, projected: Message) {
        self.token_count += full.approx_tokens();
        self.items.push(ConversationItem::new(full, self.items.last().map(|i| i.id)));
        self.messages.push(projected);
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    /// Item-level history is rebuilt from scratch in the new order — after a
    /// compaction or edit-and-resubmit the old parent chain no longer
    /// describes the replaced history.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.items = self
            .messages
            .iter()
            .fold((Vec::new(), None), |(mut items, parent): (Vec<ConversationItem>, Option<Uuid>), msg| {
                let item = ConversationItem::new(msg.clone(), parent);
                let next_parent = Some(item.id);
                items.push(item);
                (items, next_parent)
            })
            .0;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use adk_model::Message;
    use super::*;

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn new_session_has_unique_id() {
        let a = Session::new(1000);
        let b = Session::new(1000);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_session_starts_empty() {
        let s = Session::new(1000);
        assert!(s.messages.is_empty());
        assert_eq!(s.token_count, 0);
    }

    // ── Token accounting ──────────────────────────────────────────────────────

    #[test]
    fn push_increments_token_count() {
        let mut s = Session::new(1000);
        // "12345678" = 8 chars → 2 tokens
        s.push(Message::user("12345678"));
        assert_eq!(s.token_count, 2);
    }

    #[test]
    fn push_many_accumulates_tokens() {
        let mut s = Session::new(10_000);
        s.push_many([
            Message::user("12345678"),  // 2 tokens
            Message::assistant("abcd"), // 1 token
        ]);
        assert_eq!(s.token_count, 3);
    }

    #[test]
    fn recalculate_tokens_matches_push_sum() {
        let mut s = Session::new(1000);
        s.push(Message::user("hello world")); // 11 chars → 2 tokens
        let after_push = s.token_count;
        s.recalculate_tokens();
        assert_eq!(s.token_count, after_push);
    }

    #[test]
    fn recalculate_after_manual_drain_resets_to_zero() {
        let mut s = Session::new(1000);
        s.push(Message::user("text"));
        s.messages.clear();
        s.recalculate_tokens();
        assert_eq!(s.token_count, 0);
    }

    #[test]
    fn replace_messages_sets_messages_and_recalculates_tokens() {
        let mut s = Session::new(1000);
        s.push(Message::user("first"));
        s.push(Message::assistant("reply"));
        assert_eq!(s.messages.len(), 2);
        let new_msgs = vec![Message::user("only")];
        s.replace_messages(new_msgs.clone());
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].as_text(), Some("only"));
        assert_eq!(s.token_count, 1); // "only" → 1 token
    }

    // ── Context fraction ──────────────────────────────────────────────────────

    #[test]
    fn context_fraction_zero_when_empty() {
        let s = Session::new(1000);
        assert_eq!(s.context_fraction(), 0.0);
    }

    #[test]
    fn context_fraction_at_zero_max_does_not_panic() {
        let s = Session::new(0);
        assert_eq!(s.context_fraction(), 0.0);
    }

    #[test]
    fn context_fraction_increases_with_messages() {
        let mut s = Session::new(100);
        let before = s.context_fraction();
        s.push(Message::user("a long message that uses more tokens"));
        assert!(s.context_fraction() > before);
    }

    // ── Near-limit detection ──────────────────────────────────────────────────

    #[test]
    fn is_near_limit_false_when_empty() {
        let s = Session::new(1000);
        assert!(!s.is_near_limit(0.8));
    }

    #[test]
    fn is_near_limit_true_when_over_threshold() {
        let mut s = Session::new(4); // tiny window
        // Each char = 0.25 tokens; need 0.8 × 4 = 3.2 tokens → 13 chars
        s.push(Message::user("1234567890123")); // 13 chars = 3 tokens (floor) in 4-token window = 75%
        // Actually: 13/4 = 3 tokens; fraction = 3/4 = 0.75 < 0.8 → not near
        // Push one more to push it over
        s.push(Message::user("abcd")); // 1 more → 4 tokens, fraction = 1.0 ≥ 0.8
        assert!(s.is_near_limit(0.8));
    }

    #[test]
    fn is_near_limit_exactly_at_threshold() {
        let mut s = Session::new(10);
        // Need token_count / max_tokens ≥ threshold (0.5)
        // Fill exactly 5 tokens: 5*4=20 chars
        s.push(Message::user("12345678901234567890")); // 20 chars = 5 tokens
        assert!(s.is_near_limit(0.5));
        assert!(!s.is_near_limit(0.6));
    }

    // ── Conversation items ────────────────────────────────────────────────────

    #[test]
    fn push_keeps_items_in_lockstep_with_messages() {
        let mut s = Session::new(1000);
        s.push(Message::user("first"));
        s.push(Message::assistant("second"));
        assert_eq!(s.items.len(), 2);
        assert_eq!(s.items[1].parent_id, Some(s.items[0].id));
    }

    #[test]
    fn first_item_has_no_parent() {
        let mut s = Session::new(1000);
        s.push(Message::user("only"));
        assert_eq!(s.items[0].parent_id, None);
    }

    #[test]
    fn replace_messages_rebuilds_items_chain() {
        let mut s = Session::new(1000);
        s.push(Message::user("a"));
        s.push(Message::user("b"));
        s.replace_messages(vec![Message::user("only")]);
        assert_eq!(s.items.len(), 1);
        assert_eq!(s.items[0].parent_id, None);
    }

    #[test]
    fn with_budget_overrides_default_context_budget() {
        let budget = ContextBudget {
            compaction_threshold: 0.9,
            truncation_bytes: 1,
            truncation_lines: 1,
            head_lines: 1,
            tail_lines: 1,
        };
        let s = Session::with_budget(1000, budget);
        assert_eq!(s.budget.compaction_threshold, 0.9);
    }

    #[test]
    fn context_budget_from_config_carries_values_through() {
        let cfg = ContextConfig {
            compaction_threshold: 0.6,
            truncation_bytes: 2048,
            truncation_lines: 50,
            head_lines: 20,
            tail_lines: 10,
        };
        let budget: ContextBudget = (&cfg).into();
        assert_eq!(budget.truncation_bytes, 2048);
        assert_eq!(budget.truncation_lines, 50);
        assert_eq!(budget.head_lines, 20);
        assert_eq!(budget.tail_lines, 10);
    }
}
