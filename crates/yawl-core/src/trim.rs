// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic context trimming.
//!
//! When the session approaches the window, the oldest unprotected messages
//! move to the long-term archive until the estimate drops under the
//! threshold.  Protected: the system prompt, the first user message, and
//! the most recent K turns.  Removal happens in whole pair units (an
//! assistant tool-call run together with its results) so the remaining
//! head is always a legal alternation.

use std::ops::Range;

use tracing::debug;
use yawl_model::{Message, MessageContent, Role};

use crate::session::Session;

pub struct TrimOutcome {
    pub archived: Vec<Message>,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Trim oldest-first until the session fits under `threshold`, or until
/// only protected messages remain.  Returns `None` when nothing was done.
pub fn trim_to_budget(
    session: &mut Session,
    threshold: f32,
    keep_recent_turns: usize,
) -> Option<TrimOutcome> {
    if !session.is_near_limit(threshold) {
        return None;
    }
    let tokens_before = session.effective_tokens();
    let mut archived: Vec<Message> = Vec::new();

    while session.is_near_limit(threshold) {
        let Some(range) = next_trim_group(&session.messages, keep_recent_turns) else {
            break;
        };
        debug!(
            start = range.start,
            end = range.end,
            "trimming message group into long-term archive"
        );
        archived.extend(session.messages.drain(range));
        session.recalculate_tokens();
    }

    if archived.is_empty() {
        None
    } else {
        Some(TrimOutcome {
            archived,
            tokens_before,
            tokens_after: session.effective_tokens(),
        })
    }
}

/// The next removable group: starts right after the first user message and
/// ends before the protected recent tail.  A group is one message, except
/// that an assistant tool-call run extends through all its sibling calls
/// and their results (pair unit).
fn next_trim_group(messages: &[Message], keep_recent_turns: usize) -> Option<Range<usize>> {
    let is_user_text =
        |m: &Message| m.role == Role::User && matches!(m.content, MessageContent::Text(_));

    let first_user = messages.iter().position(is_user_text)?;
    let user_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| is_user_text(m))
        .map(|(i, _)| i)
        .collect();
    if user_indices.len() <= keep_recent_turns {
        return None;
    }
    let mut tail_start = user_indices[user_indices.len() - keep_recent_turns];

    // If the tail boundary falls inside a tool interaction, pull it backward
    // so the whole group stays in the tail; a tool result whose call was
    // summarised away would poison the next request.
    while tail_start > first_user + 1
        && matches!(
            messages[tail_start].content,
            MessageContent::ToolCall { .. } | MessageContent::ToolResult { .. }
        )
    {
        tail_start -= 1;
    }

    let start = first_user + 1;
    if start >= tail_start {
        return None;
    }

    let mut end = start + 1;
    if matches!(messages[start].content, MessageContent::ToolCall { .. }) {
        while end < tail_start && matches!(messages[end].content, MessageContent::ToolCall { .. }) {
            end += 1;
        }
        while end < tail_start
            && matches!(messages[end].content, MessageContent::ToolResult { .. })
        {
            end += 1;
        }
    } else if matches!(messages[start].content, MessageContent::ToolResult { .. }) {
        // Orphaned results can only appear after an earlier partial trim;
        // sweep the run as one group.  Tolerated, but worth a trace.
        debug!("orphaned tool results at trim boundary");
        while end < tail_start
            && matches!(messages[end].content, MessageContent::ToolResult { .. })
        {
            end += 1;
        }
    }
    Some(start..end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Session with a tiny window so token pressure is easy to arrange.
    fn pressured_session() -> Session {
        let mut s = Session::new(40, 1.0);
        s.push(Message::system("system prompt words"));
        s.push(Message::user("first user message must survive"));
        s
    }

    fn push_turn(s: &mut Session, n: usize) {
        s.push(Message::user(format!("question number {n} with several words")));
        s.push(Message::assistant(format!("answer number {n} with several words")));
    }

    fn assert_alternation_legal(messages: &[Message]) {
        // Every tool call answered before the next assistant text/turn.
        let mut open: Vec<&str> = Vec::new();
        for m in messages {
            match &m.content {
                MessageContent::ToolCall { tool_call_id, .. } => open.push(tool_call_id),
                MessageContent::ToolResult { tool_call_id, .. } => {
                    let pos = open
                        .iter()
                        .position(|id| id == tool_call_id)
                        .expect("result without open call");
                    open.remove(pos);
                }
                MessageContent::Text(_) => {
                    assert!(open.is_empty(), "text message while tool calls unanswered");
                }
            }
        }
        assert!(open.is_empty(), "unanswered tool calls at end");
    }

    #[test]
    fn under_threshold_is_a_noop() {
        let mut s = Session::new(100_000, 1.0);
        s.push(Message::system("sys"));
        s.push(Message::user("hello"));
        assert!(trim_to_budget(&mut s, 0.85, 8).is_none());
    }

    #[test]
    fn trims_oldest_first_keeping_system_and_first_user() {
        let mut s = pressured_session();
        for n in 0..6 {
            push_turn(&mut s, n);
        }
        let outcome = trim_to_budget(&mut s, 0.5, 2).expect("should trim");
        assert!(outcome.tokens_after < outcome.tokens_before);
        assert!(!outcome.archived.is_empty());

        // Protected head intact.
        assert_eq!(s.messages[0].role, Role::System);
        assert_eq!(
            s.messages[1].as_text(),
            Some("first user message must survive")
        );
        // Oldest unprotected message went first.
        assert_eq!(
            outcome.archived[0].as_text(),
            Some("question number 0 with several words")
        );
    }

    #[test]
    fn recent_tail_is_preserved() {
        let mut s = pressured_session();
        for n in 0..6 {
            push_turn(&mut s, n);
        }
        trim_to_budget(&mut s, 0.1, 2).expect("should trim");
        let texts: Vec<&str> = s.messages.iter().filter_map(|m| m.as_text()).collect();
        assert!(texts.contains(&"question number 4 with several words"));
        assert!(texts.contains(&"question number 5 with several words"));
    }

    #[test]
    fn exhaustive_trim_leaves_exactly_protected_messages() {
        let mut s = pressured_session();
        for n in 0..5 {
            push_turn(&mut s, n);
        }
        // Impossible threshold: trim everything eligible, then stop.
        trim_to_budget(&mut s, 0.0001, 2).expect("should trim");
        // system + first user + last 2 turns (user+assistant each)
        assert_eq!(s.messages.len(), 6);
        assert_eq!(s.messages[0].role, Role::System);
        assert_eq!(
            s.messages[1].as_text(),
            Some("first user message must survive")
        );
        assert_eq!(
            s.messages[2].as_text(),
            Some("question number 3 with several words")
        );
    }

    #[test]
    fn tool_pairs_are_removed_whole() {
        let mut s = pressured_session();
        // Old turn with a tool interaction.
        s.push(Message::user("old question"));
        s.push(Message::assistant("checking"));
        s.push(Message::tool_call("tc-1", "fs", &json!({"operation": "list"})));
        s.push(Message::tool_call("tc-2", "fs", &json!({"operation": "read"})));
        s.push(Message::tool_result("tc-1", "listing", false));
        s.push(Message::tool_result("tc-2", "contents", false));
        s.push(Message::assistant("old answer"));
        for n in 0..3 {
            push_turn(&mut s, n);
        }

        trim_to_budget(&mut s, 0.0001, 2).expect("should trim");
        assert_alternation_legal(&s.messages);
        // No stray tool messages survive outside the tail.
        assert!(!s
            .messages
            .iter()
            .any(|m| matches!(m.content, MessageContent::ToolCall { .. })));
    }

    #[test]
    fn archived_spans_are_whole_pairs() {
        let mut s = pressured_session();
        s.push(Message::user("old question"));
        s.push(Message::tool_call("tc-1", "shell", &json!({"command": "ls"})));
        s.push(Message::tool_result("tc-1", "a b c", false));
        s.push(Message::assistant("done"));
        for n in 0..3 {
            push_turn(&mut s, n);
        }
        let outcome = trim_to_budget(&mut s, 0.0001, 2).expect("should trim");
        // The call and its result must land in the archive together.
        let call_pos = outcome
            .archived
            .iter()
            .position(|m| matches!(m.content, MessageContent::ToolCall { .. }));
        let result_pos = outcome
            .archived
            .iter()
            .position(|m| matches!(m.content, MessageContent::ToolResult { .. }));
        assert!(call_pos.is_some());
        assert_eq!(result_pos, call_pos.map(|p| p + 1));
    }

    #[test]
    fn fewer_turns_than_keep_is_a_noop_even_over_budget() {
        let mut s = pressured_session();
        push_turn(&mut s, 0);
        assert!(trim_to_budget(&mut s, 0.0001, 8).is_none());
    }
}
