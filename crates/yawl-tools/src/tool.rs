// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Failures are carried as `is_error = true` with an explanatory message in
/// `content` — the agent loop forwards them to the model so it can read and
/// react to the error; they are never raised as process errors.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// Short human description of what the tool did, for the UI
    /// (e.g. "wrote 412 bytes to src/main.rs").
    pub action: Option<String>,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            action: None,
            is_error: false,
        }
    }

    /// Successful result with an action description for the UI.
    pub fn ok_with_action(
        call_id: impl Into<String>,
        content: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            action: Some(action.into()),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            action: None,
            is_error: true,
        }
    }
}

/// Trait that every built-in and user-defined tool must implement.
///
/// A tool may expose several operations behind one schema, distinguished by
/// an `operation` argument; the schema declares the union of all operations'
/// parameters (none of the per-operation ones required) and the tool
/// validates per-operation requirements itself.  Models produce JSON more
/// reliably when every legal field is declared up front than when schemas
/// diverge per operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
