// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
/// Events emitted by the agent during a single turn.
/// Consumers (the CLI front-end, sub-agent runners) subscribe to these to
/// drive their output.  `Status` is display-only chatter for spinners and
/// progress lines — it never enters the model transcript.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A thinking/reasoning chunk (hidden by default in front-ends)
    ThinkingDelta(String),
    /// The complete text response once streaming finishes
    TextComplete(String),
    /// The model requested a tool call and it is about to execute
    ToolCallStarted { call_id: String, tool_name: String },
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        /// Short human description of what the tool did, when it gave one.
        action: Option<String>,
    },
    /// Token usage update from the provider
    TokenUsage {
        input: u32,
        output: u32,
        context_tokens: usize,
        max_tokens: usize,
    },
    /// Old history was trimmed into the long-term archive
    ContextTrimmed {
        archived: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// Display-only status line (spinner text); not part of the transcript
    Status(String),
    /// The turn was cancelled; the partial text was preserved
    Aborted { partial_text: String },
    /// The agent finished processing the current user turn
    TurnComplete,
}
