// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use uuid::Uuid;
use yawl_model::Message;

/// In-memory conversation session.
///
/// Token accounting keeps a running local estimate (whitespace heuristic)
/// and remembers the provider's last reported input token count, which is
/// authoritative.  Trim decisions use whichever is larger, plus the tool
/// schema overhead carried on every request.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Running local token estimate for `messages`
    pub token_count: usize,
    /// Context window of the active model
    pub max_tokens: usize,
    /// Tokens-per-word factor for the local estimator
    pub token_factor: f32,
    /// Estimated cost of the tool schemas sent with every request
    pub schema_overhead: usize,
    /// Last input token count reported by the provider's usage events
    pub reported_input_tokens: u32,
}

impl Session {
    pub fn new(max_tokens: usize, token_factor: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            token_factor,
            schema_overhead: 0,
            reported_input_tokens: 0,
        }
    }

    /// Rehydrate a session from persisted state.
    pub fn resume(
        id: String,
        created_at: DateTime<Utc>,
        messages: Vec<Message>,
        max_tokens: usize,
        token_factor: f32,
    ) -> Self {
        let mut s = Self::new(max_tokens, token_factor);
        s.id = id;
        s.created_at = created_at;
        s.replace_messages(messages);
        s
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens(self.token_factor);
        self.messages.push(msg);
    }

    /// Recalculate the token estimate from scratch (call after trimming).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self
            .messages
            .iter()
            .map(|m| m.approx_tokens(self.token_factor))
            .sum();
        // The old provider figure describes a conversation that no longer
        // exists; drop it until the next usage event.
        self.reported_input_tokens = 0;
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Record the provider's authoritative input token count.
    pub fn note_usage(&mut self, input_tokens: u32) {
        if input_tokens > 0 {
            self.reported_input_tokens = input_tokens;
        }
    }

    /// Tokens the next request will plausibly consume.
    pub fn effective_tokens(&self) -> usize {
        self.token_count.max(self.reported_input_tokens as usize) + self.schema_overhead
    }

    /// Fraction of the context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.effective_tokens() as f32 / self.max_tokens as f32
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use yawl_model::Message;

    #[test]
    fn new_session_has_unique_id() {
        let a = Session::new(1000, 1.0);
        let b = Session::new(1000, 1.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn push_increments_token_count() {
        let mut s = Session::new(1000, 1.0);
        s.push(Message::user("one two three"));
        assert_eq!(s.token_count, 3);
    }

    #[test]
    fn recalculate_matches_push_sum() {
        let mut s = Session::new(1000, 1.0);
        s.push(Message::user("hello world"));
        s.push(Message::assistant("hi"));
        let after_push = s.token_count;
        s.recalculate_tokens();
        assert_eq!(s.token_count, after_push);
    }

    #[test]
    fn reported_usage_wins_when_larger() {
        let mut s = Session::new(1000, 1.0);
        s.push(Message::user("short"));
        s.note_usage(500);
        assert_eq!(s.effective_tokens(), 500);
    }

    #[test]
    fn schema_overhead_is_added() {
        let mut s = Session::new(1000, 1.0);
        s.push(Message::user("one two"));
        s.schema_overhead = 40;
        assert_eq!(s.effective_tokens(), 42);
    }

    #[test]
    fn recalculate_drops_stale_usage() {
        let mut s = Session::new(1000, 1.0);
        s.push(Message::user("a b c"));
        s.note_usage(900);
        s.recalculate_tokens();
        assert_eq!(s.effective_tokens(), 3);
    }

    #[test]
    fn near_limit_thresholds() {
        let mut s = Session::new(10, 1.0);
        s.push(Message::user("a b c d e")); // 5 tokens of 10
        assert!(s.is_near_limit(0.5));
        assert!(!s.is_near_limit(0.6));
    }

    #[test]
    fn zero_window_never_near_limit() {
        let mut s = Session::new(0, 1.0);
        s.push(Message::user("words here"));
        assert!(!s.is_near_limit(0.1));
    }

    #[test]
    fn resume_restores_messages_and_identity() {
        let msgs = vec![Message::system("s"), Message::user("u")];
        let s = Session::resume("fixed-id".into(), Utc::now(), msgs, 1000, 1.0);
        assert_eq!(s.id, "fixed-id");
        assert_eq!(s.messages.len(), 2);
        assert!(s.token_count > 0);
    }
}
