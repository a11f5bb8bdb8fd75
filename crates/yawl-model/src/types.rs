use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// The content of a message.
///
/// - `Text` – simple string (most messages)
/// - `ToolCall` – the assistant requests a tool invocation
/// - `ToolResult` – the result of a tool call, with its error flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: args.to_string(),
                },
            },
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
                is_error,
            },
        }
    }

    /// Return the plain text of this message, if it is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Call id carried by this message, for tool-call and tool-result content.
    pub fn call_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolCall { tool_call_id, .. }
            | MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Approximate token count used for trim decisions.
    ///
    /// Whitespace-word count times a provider-specific factor.  This is a
    /// policy estimate only: the provider's `usage` events stay authoritative
    /// for accounting.
    pub fn approx_tokens(&self, factor: f32) -> usize {
        let words = match &self.content {
            MessageContent::Text(t) => t.split_whitespace().count(),
            MessageContent::ToolCall { function, .. } => {
                function.name.split_whitespace().count()
                    + function.arguments.split_whitespace().count()
            }
            MessageContent::ToolResult { content, .. } => content.split_whitespace().count(),
        };
        ((words as f32 * factor).ceil() as usize).max(1)
    }
}

// ─── Request / schema types ───────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

impl ToolSchema {
    /// Token cost of carrying this schema on every request.
    pub fn approx_tokens(&self, factor: f32) -> usize {
        let text = format!("{} {} {}", self.name, self.description, self.parameters);
        ((text.split_whitespace().count() as f32 * factor).ceil() as usize).max(1)
    }
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

// ─── Stream event types ───────────────────────────────────────────────────────

/// Normalized stream-termination reason across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stop,
    Length,
    ToolCalls,
    Error,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Stop => write!(f, "stop"),
            StopReason::Length => write!(f, "length"),
            StopReason::ToolCalls => write!(f, "tool_calls"),
            StopReason::Error => write!(f, "error"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single decoded event from the model stream.
///
/// Tool-call argument deltas never escape the decoder: they accumulate
/// internally and surface as one `ToolCallFinished` per call when the block
/// closes, with `malformed = true` when the accumulated JSON failed to parse
/// (a malformed call is reported, never silently dropped).
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A thinking/reasoning delta from the model (reasoning models).
    ThinkingDelta(String),
    /// A tool-use block opened; arguments will follow.
    ToolCallStarted { id: String, name: String },
    /// A tool-use block closed with its full argument object.
    ToolCallFinished {
        id: String,
        name: String,
        arguments: Value,
        malformed: bool,
    },
    /// Token usage statistics
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The provider reported its stop reason.
    Stop(StopReason),
    /// The stream finished normally
    Done,
    /// A recoverable in-stream error (non-fatal warning)
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_tool_result_carries_error_flag() {
        let m = Message::tool_result("id-1", "boom", true);
        assert_eq!(m.role, Role::Tool);
        match &m.content {
            MessageContent::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_call_id, "id-1");
                assert_eq!(content, "boom");
                assert!(is_error);
            }
            _ => panic!("wrong content variant"),
        }
    }

    #[test]
    fn message_tool_call_serializes_arguments_as_string() {
        let m = Message::tool_call("c1", "fs", &json!({"operation": "read"}));
        match &m.content {
            MessageContent::ToolCall { function, .. } => {
                let parsed: Value = serde_json::from_str(&function.arguments).unwrap();
                assert_eq!(parsed["operation"], "read");
            }
            _ => panic!("wrong content variant"),
        }
    }

    #[test]
    fn call_id_present_only_on_tool_content() {
        assert!(Message::user("x").call_id().is_none());
        assert_eq!(
            Message::tool_result("abc", "", false).call_id(),
            Some("abc")
        );
        assert_eq!(
            Message::tool_call("def", "t", &json!({})).call_id(),
            Some("def")
        );
    }

    #[test]
    fn approx_tokens_counts_words_times_factor() {
        let m = Message::user("one two three four");
        // 4 words × 1.5 = 6
        assert_eq!(m.approx_tokens(1.5), 6);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        let m = Message::user("");
        assert_eq!(m.approx_tokens(1.3), 1);
    }

    #[test]
    fn message_round_trips_through_json() {
        let original = Message::tool_result("tc-9", "output text", false);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tool_result_without_error_field_deserializes() {
        // Older persisted conversations predate the is_error field.
        let json = r#"{"role":"tool","content":{"tool_call_id":"x","content":"ok"}}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        match m.content {
            MessageContent::ToolResult { is_error, .. } => assert!(!is_error),
            _ => panic!("wrong content variant"),
        }
    }

    #[test]
    fn stop_reason_display_is_snake_case() {
        assert_eq!(StopReason::ToolCalls.to_string(), "tool_calls");
    }
}
