// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat completion adapter.
//!
//! Many providers speak the same `/chat/completions` SSE wire format; this
//! single implementation covers them all, configured with its endpoint, auth
//! style, and any extra headers.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    error::ModelError,
    provider::EventStream,
    retry::{self, RetryPolicy},
    sse::{self, SseDecoder},
    CompletionRequest, Message, MessageContent, ResponseEvent, Role, StopReason,
};

/// How to send the API key in HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — standard for most providers.
    Bearer,
    /// `api-key: <key>` — Azure OpenAI style.
    ApiKeyHeader,
    /// No authentication header — local servers.
    None,
}

pub struct OpenAICompatProvider {
    driver_name: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    auth_style: AuthStyle,
    extra_headers: Vec<(String, String)>,
    request_timeout: Duration,
    idle_timeout: Duration,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.openai.com/v1`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: impl Into<String>,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        request_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name: driver_name.into(),
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            auth_style,
            extra_headers,
            request_timeout,
            idle_timeout,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        &self.driver_name
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<EventStream, ModelError> {
        let messages = build_openai_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let resp = retry::with_backoff(&self.retry, "completion request", || {
            let mut rb = self
                .client
                .post(&self.chat_url)
                .timeout(self.request_timeout)
                .header("accept", "text/event-stream")
                .json(&body);
            rb = match self.auth_style {
                AuthStyle::Bearer => match self.api_key.as_deref() {
                    Some(key) => rb.bearer_auth(key),
                    None => rb,
                },
                AuthStyle::ApiKeyHeader => match self.api_key.as_deref() {
                    Some(key) => rb.header("api-key", key),
                    None => rb,
                },
                AuthStyle::None => rb,
            };
            for (name, val) in &self.extra_headers {
                rb = rb.header(name.as_str(), val.as_str());
            }
            async move { sse::check_response(rb.send().await).await }
        })
        .await?;

        Ok(sse::decode_sse(
            resp,
            OpenAiDecoder::default(),
            self.idle_timeout,
        ))
    }
}

// ─── Stream decoding ──────────────────────────────────────────────────────────

struct ToolAccumulator {
    id: String,
    name: String,
    args_buf: String,
    announced: bool,
}

impl ToolAccumulator {
    fn finish(self) -> ResponseEvent {
        let (arguments, malformed) = if self.args_buf.is_empty() {
            (Value::Object(Default::default()), false)
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => (v, false),
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        error = %e,
                        "tool call arguments failed to parse at stream end"
                    );
                    (Value::Object(Default::default()), true)
                }
            }
        };
        ResponseEvent::ToolCallFinished {
            id: self.id,
            name: self.name,
            arguments,
            malformed,
        }
    }
}

/// Stateful decoder for the chat-completions SSE dialect.
///
/// Parallel tool calls interleave across chunks, each delta keyed by an
/// `index` field; accumulators are flushed in index order when the choice
/// reports `finish_reason: "tool_calls"` (or at `[DONE]` for providers that
/// omit the finish chunk).
#[derive(Default)]
struct OpenAiDecoder {
    tools: BTreeMap<u32, ToolAccumulator>,
}

impl OpenAiDecoder {
    fn flush_tools(&mut self) -> Vec<Result<ResponseEvent, ModelError>> {
        let drained = std::mem::take(&mut self.tools);
        drained
            .into_values()
            .filter(|acc| {
                // A call with no name cannot be dispatched or answered; carrying
                // it forward would corrupt the next request.
                if acc.name.is_empty() {
                    warn!(tool_call_id = %acc.id, "dropping tool call with empty name");
                    return false;
                }
                true
            })
            .map(|acc| Ok(acc.finish()))
            .collect()
    }
}

impl SseDecoder for OpenAiDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ResponseEvent, ModelError>> {
        let Some(data) = line.strip_prefix("data:") else {
            return vec![];
        };
        let data = data.trim();
        if data.is_empty() {
            return vec![];
        }
        if data == "[DONE]" {
            let mut events = self.flush_tools();
            events.push(Ok(ResponseEvent::Done));
            return events;
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return vec![],
        };

        // Usage-only chunk (stream_options.include_usage).
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            return vec![Ok(ResponseEvent::Usage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            })];
        }

        let choice = &v["choices"][0];
        if choice.is_null() {
            return vec![];
        }

        let mut events: Vec<Result<ResponseEvent, ModelError>> = Vec::new();
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(Ok(ResponseEvent::TextDelta(text.to_string())));
            }
        }
        // Reasoning models surface chain-of-thought in a separate field.
        if let Some(thinking) = delta["reasoning_content"].as_str() {
            if !thinking.is_empty() {
                events.push(Ok(ResponseEvent::ThinkingDelta(thinking.to_string())));
            }
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as u32;
                let acc = self.tools.entry(index).or_insert_with(|| ToolAccumulator {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                    announced: false,
                });
                if let Some(id) = tc["id"].as_str() {
                    if !id.is_empty() {
                        acc.id = id.to_string();
                    }
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    if !name.is_empty() {
                        acc.name = name.to_string();
                    }
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    acc.args_buf.push_str(args);
                }
                if !acc.announced && !acc.name.is_empty() {
                    acc.announced = true;
                    events.push(Ok(ResponseEvent::ToolCallStarted {
                        id: acc.id.clone(),
                        name: acc.name.clone(),
                    }));
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            match reason {
                "tool_calls" => {
                    events.extend(self.flush_tools());
                    events.push(Ok(ResponseEvent::Stop(StopReason::ToolCalls)));
                }
                "length" => events.push(Ok(ResponseEvent::Stop(StopReason::Length))),
                "stop" => events.push(Ok(ResponseEvent::Stop(StopReason::Stop))),
                _ => {}
            }
        }

        events
    }

    fn finish(&mut self) -> Vec<Result<ResponseEvent, ModelError>> {
        self.flush_tools()
    }
}

// ─── Request building ─────────────────────────────────────────────────────────

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert the conversation into the chat-completions wire format.
///
/// A run of assistant tool-call messages collapses into one assistant
/// message with a `tool_calls` array, which is the shape the API expects
/// for parallel calls; tool results follow as `role: "tool"` messages.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for m in messages {
        match &m.content {
            MessageContent::Text(t) => {
                out.push(json!({ "role": role_str(&m.role), "content": t }));
            }
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => {
                let entry = json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "arguments": function.arguments,
                    }
                });
                let merged = match out.last_mut() {
                    Some(last)
                        if last["role"] == "assistant" && last.get("tool_calls").is_some() =>
                    {
                        last["tool_calls"].as_array_mut().map(|a| a.push(entry.clone()));
                        true
                    }
                    _ => false,
                };
                if !merged {
                    out.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": [entry],
                    }));
                }
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
                ..
            } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
