// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
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

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    request_timeout: Duration,
    idle_timeout: Duration,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        request_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            request_timeout,
            idle_timeout,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<EventStream, ModelError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Auth("ANTHROPIC_API_KEY not set".into()))?;

        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": req.stream,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending anthropic request"
        );

        let url = format!("{}/v1/messages", self.base_url);
        let resp = retry::with_backoff(&self.retry, "anthropic request", || {
            let rb = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01")
                .header("accept", "text/event-stream")
                .json(&body);
            async move { sse::check_response(rb.send().await).await }
        })
        .await?;

        Ok(sse::decode_sse(
            resp,
            AnthropicDecoder::default(),
            self.idle_timeout,
        ))
    }
}

// ─── Stream decoding ──────────────────────────────────────────────────────────

struct ToolAccumulator {
    id: String,
    name: String,
    args_buf: String,
}

impl ToolAccumulator {
    /// Parse the accumulated argument JSON.  An empty buffer is a legal call
    /// with no arguments; anything unparseable is reported as malformed so
    /// the loop can synthesize an error result the model will see.
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
                        "tool call arguments failed to parse on block close"
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

/// Stateful decoder for the Anthropic Messages SSE dialect.
///
/// `event:` lines are ignored; the `data:` JSON's `type` field is
/// authoritative.  Tool-use blocks are keyed by content-block index and
/// accumulated across `input_json_delta` events until `content_block_stop`.
#[derive(Default)]
struct AnthropicDecoder {
    blocks: HashMap<u32, ToolAccumulator>,
}

impl SseDecoder for AnthropicDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ResponseEvent, ModelError>> {
        let Some(data) = line.strip_prefix("data:") else {
            return vec![];
        };
        let data = data.trim();
        if data.is_empty() {
            return vec![];
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            // Each event decodes independently; one bad frame is tolerated.
            Err(_) => return vec![],
        };

        match v["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let id = block["id"].as_str().unwrap_or("").to_string();
                    let name = block["name"].as_str().unwrap_or("").to_string();
                    self.blocks.insert(
                        index,
                        ToolAccumulator {
                            id: id.clone(),
                            name: name.clone(),
                            args_buf: String::new(),
                        },
                    );
                    return vec![Ok(ResponseEvent::ToolCallStarted { id, name })];
                }
                vec![]
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if text.is_empty() {
                            vec![]
                        } else {
                            vec![Ok(ResponseEvent::TextDelta(text.to_string()))]
                        }
                    }
                    "thinking_delta" => {
                        let thinking = delta["thinking"].as_str().unwrap_or("");
                        if thinking.is_empty() {
                            vec![]
                        } else {
                            vec![Ok(ResponseEvent::ThinkingDelta(thinking.to_string()))]
                        }
                    }
                    "input_json_delta" => {
                        if let Some(acc) = self.blocks.get_mut(&index) {
                            acc.args_buf
                                .push_str(delta["partial_json"].as_str().unwrap_or(""));
                        }
                        vec![]
                    }
                    // Encrypted integrity blob at the end of a thinking block.
                    // Never surfaced as readable text.
                    "signature_delta" => vec![],
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                match self.blocks.remove(&index) {
                    Some(acc) => vec![Ok(acc.finish())],
                    None => vec![],
                }
            }
            "message_start" => {
                if let Some(usage) = v["message"].get("usage") {
                    return vec![Ok(ResponseEvent::Usage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                        output_tokens: 0,
                    })];
                }
                vec![]
            }
            "message_delta" => {
                let mut events = Vec::new();
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    let mapped = match reason {
                        "end_turn" | "stop_sequence" => StopReason::Stop,
                        "max_tokens" => StopReason::Length,
                        "tool_use" => StopReason::ToolCalls,
                        _ => StopReason::Stop,
                    };
                    events.push(Ok(ResponseEvent::Stop(mapped)));
                }
                if let Some(usage) = v.get("usage") {
                    events.push(Ok(ResponseEvent::Usage {
                        input_tokens: 0,
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    }));
                }
                events
            }
            "message_stop" => vec![Ok(ResponseEvent::Done)],
            "error" => {
                let msg = v["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown provider error")
                    .to_string();
                vec![Ok(ResponseEvent::Error(msg))]
            }
            // "ping" and future event types
            _ => vec![],
        }
    }

    fn finish(&mut self) -> Vec<Result<ResponseEvent, ModelError>> {
        // Body ended without message_stop: flush any open tool blocks so a
        // truncated stream still reports what it accumulated.
        let mut pending: Vec<(u32, ToolAccumulator)> = self.blocks.drain().collect();
        pending.sort_by_key(|(idx, _)| *idx);
        pending
            .into_iter()
            .map(|(_, acc)| Ok(acc.finish()))
            .collect()
    }
}

// ─── Request building ─────────────────────────────────────────────────────────

/// Convert the conversation into the Anthropic wire format.
///
/// Returns `(system_text, messages)`.  The system message is lifted to the
/// top-level `system` field.  Tool results become user-role `tool_result`
/// blocks.  Consecutive same-role messages are merged into one wire message
/// with a combined content array, which re-validates the ordering the
/// Messages API enforces (strict user/assistant alternation).
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_text = String::new();
    let mut grouped: Vec<(&'static str, Vec<Value>)> = Vec::new();

    fn push_block(grouped: &mut Vec<(&'static str, Vec<Value>)>, role: &'static str, block: Value) {
        match grouped.last_mut() {
            Some((r, blocks)) if *r == role => blocks.push(block),
            _ => grouped.push((role, vec![block])),
        }
    }

    for m in messages {
        if m.role == Role::System {
            if let Some(t) = m.as_text() {
                system_text = t.to_string();
            }
            continue;
        }
        match &m.content {
            MessageContent::Text(t) => {
                if t.is_empty() {
                    continue;
                }
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                push_block(&mut grouped, role, json!({ "type": "text", "text": t }));
            }
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => {
                // Anthropic requires tool_use.id to match `^[a-zA-Z0-9_-]+$`.
                // An empty id can arise when a content_block_start event was
                // missing from the stream; substitute a stable fallback rather
                // than sending an invalid request.
                let safe_id = if tool_call_id.is_empty() {
                    warn!(
                        tool_name = %function.name,
                        "tool call has empty id when building request; using fallback"
                    );
                    "tc_fallback".to_string()
                } else {
                    tool_call_id.clone()
                };
                push_block(
                    &mut grouped,
                    "assistant",
                    json!({
                        "type": "tool_use",
                        "id": safe_id,
                        "name": function.name,
                        "input": serde_json::from_str::<Value>(&function.arguments)
                            .unwrap_or(json!({})),
                    }),
                );
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                });
                if *is_error {
                    block["is_error"] = json!(true);
                }
                push_block(&mut grouped, "user", block);
            }
        }
    }

    let wire = grouped
        .into_iter()
        .map(|(role, blocks)| json!({ "role": role, "content": blocks }))
        .collect();
    (system_text, wire)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
