// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::{
    error::ModelError, provider::EventStream, CompletionRequest, ResponseEvent, Role, StopReason,
};

/// Deterministic mock provider for tests and offline smoke runs.  Echoes the
/// last user message back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<EventStream, ModelError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<Result<ResponseEvent, ModelError>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage {
                input_tokens: 10,
                output_tokens: 10,
            }),
            Ok(ResponseEvent::Stop(StopReason::Stop)),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider.  Each `complete` call pops the next response
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of per-call event scripts.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Event script for one text-only turn.
    pub fn text_script(reply: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Usage {
                input_tokens: 5,
                output_tokens: 5,
            },
            ResponseEvent::Stop(StopReason::Stop),
            ResponseEvent::Done,
        ]
    }

    /// Event script for a turn that requests a single tool call.
    pub fn tool_call_script(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Vec<ResponseEvent> {
        let id = id.into();
        let name = name.into();
        vec![
            ResponseEvent::ToolCallStarted {
                id: id.clone(),
                name: name.clone(),
            },
            ResponseEvent::ToolCallFinished {
                id,
                name,
                arguments,
                malformed: false,
            },
            ResponseEvent::Stop(StopReason::ToolCalls),
            ResponseEvent::Done,
        ]
    }

    /// Convenience: a tool-call round followed by a text round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(tool_id, tool_name, arguments),
            Self::text_script(final_text),
        ])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<EventStream, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Stop(StopReason::Stop),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<Result<ResponseEvent, ModelError>> =
            events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
