// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use yawl_config::AgentConfig;
use yawl_model::{
    CompletionRequest, Message, ModelError, ModelProvider, ResponseEvent, StopReason, ToolSchema,
};
use yawl_tools::{Redactor, ToolCall, ToolOutput, ToolRegistry, ToolResultStore};

use crate::{
    error::TurnError,
    events::AgentEvent,
    longterm::LongTermLog,
    session::Session,
    store::{SessionDocument, SessionStore},
    trim,
};

/// The core agent.  Owns a session and drives the model ↔ tool loop.
pub struct Agent {
    session: Session,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    config: Arc<AgentConfig>,
    store: Arc<SessionStore>,
    longterm: Arc<LongTermLog>,
    result_store: Arc<ToolResultStore>,
    redactor: Redactor,
    system_prompt: String,
}

/// One finalized tool call collected from the stream.
struct FinishedCall {
    id: String,
    name: String,
    arguments: Value,
    malformed: bool,
}

enum StreamOutcome {
    Completed {
        text: String,
        calls: Vec<FinishedCall>,
    },
    Aborted {
        text: String,
    },
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: Arc<AgentConfig>,
        session: Session,
        store: Arc<SessionStore>,
        longterm: Arc<LongTermLog>,
        result_store: Arc<ToolResultStore>,
        redactor: Redactor,
        system_prompt: String,
    ) -> Self {
        Self {
            session,
            tools,
            model,
            config,
            store,
            longterm,
            result_store,
            redactor,
            system_prompt,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Push a user message, run the turn, and stream events through the
    /// sender.  The caller drops the receiver when no longer interested.
    pub async fn submit(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), TurnError> {
        // Keep the sender half alive so the turn is never seen as cancelled.
        let (_cancel_tx, cancel_rx) = oneshot::channel::<()>();
        self.submit_with_cancel(user_input, tx, cancel_rx).await
    }

    /// Like [`submit`] but with a cancellation channel.
    ///
    /// Both an explicit `send(())` and a dropped sender count as
    /// cancellation.  On cancel, text streamed so far and any tool calls
    /// already executed are committed to the session so the next turn sees
    /// a legal transcript, and `AgentEvent::Aborted` is emitted.
    pub async fn submit_with_cancel(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<(), TurnError> {
        if cancelled(&mut cancel) {
            let _ = tx
                .send(AgentEvent::Aborted {
                    partial_text: String::new(),
                })
                .await;
            return Ok(());
        }

        if self.session.messages.is_empty() {
            self.session.push(Message::system(&self.system_prompt));
        }
        self.session.push(Message::user(user_input));

        self.run_turn(tx, &mut cancel).await
    }

    /// The per-turn state machine: build request → stream → resolve →
    /// execute tools sequentially → iterate until the model answers in text,
    /// the iteration cap trips, or the turn is cancelled.
    async fn run_turn(
        &mut self,
        tx: mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(), TurnError> {
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            if iterations > self.config.max_iterations {
                // The conversation is preserved and persisted; the caller
                // decides whether to continue with another user turn.
                self.persist()?;
                return Err(TurnError::IterationCap {
                    iterations: self.config.max_iterations,
                });
            }

            self.trim_if_needed(&tx).await?;

            let outcome = self.stream_one_turn(&tx, cancel).await?;
            let (text, calls) = match outcome {
                StreamOutcome::Aborted { text } => {
                    if !text.is_empty() {
                        self.session.push(Message::assistant(&text));
                    }
                    self.persist()?;
                    let _ = tx.send(AgentEvent::Aborted { partial_text: text }).await;
                    return Ok(());
                }
                StreamOutcome::Completed { text, calls } => (text, calls),
            };

            if !text.is_empty() {
                self.session.push(Message::assistant(&text));
                let _ = tx.send(AgentEvent::TextComplete(text)).await;
            }

            if calls.is_empty() {
                self.persist()?;
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(());
            }

            // Execute tools sequentially, preserving the model-emitted
            // order.  Each call's messages are appended as a pair so the
            // transcript stays legal at every step, including cancellation
            // between calls.
            for fc in calls {
                if cancelled(cancel) {
                    self.persist()?;
                    let _ = tx
                        .send(AgentEvent::Aborted {
                            partial_text: String::new(),
                        })
                        .await;
                    return Ok(());
                }

                let _ = tx
                    .send(AgentEvent::ToolCallStarted {
                        call_id: fc.id.clone(),
                        tool_name: fc.name.clone(),
                    })
                    .await;
                self.session
                    .push(Message::tool_call(&fc.id, &fc.name, &fc.arguments));

                let output = if fc.malformed {
                    // Observable by the model on the next round; it usually
                    // self-corrects within one retry.
                    ToolOutput::err(
                        &fc.id,
                        "malformed arguments: the tool-call JSON did not parse. \
                         Re-issue the call with a valid JSON argument object.",
                    )
                } else {
                    self.tools
                        .execute(&ToolCall {
                            id: fc.id.clone(),
                            name: fc.name.clone(),
                            args: fc.arguments.clone(),
                        })
                        .await
                };

                let scrubbed = self.redactor.apply(&output.content);
                let visible = match self.result_store.process_result(&fc.id, &scrubbed) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, call_id = %fc.id, "result spill failed; embedding verbatim");
                        scrubbed
                    }
                };

                self.session
                    .push(Message::tool_result(&fc.id, &visible, output.is_error));
                let _ = tx
                    .send(AgentEvent::ToolCallFinished {
                        call_id: fc.id,
                        tool_name: fc.name,
                        output: visible,
                        is_error: output.is_error,
                        action: output.action,
                    })
                    .await;
            }

            // Keep the on-disk transcript current between rounds.
            self.persist()?;
        }
    }

    /// Call the model once, forwarding text deltas byte-live and collecting
    /// finalized tool calls.  One stream restart is permitted on a protocol
    /// error; every other stream failure fails the turn.
    async fn stream_one_turn(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<StreamOutcome, TurnError> {
        let schemas: Vec<ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();
        self.session.schema_overhead = schemas
            .iter()
            .map(|s| s.approx_tokens(self.session.token_factor))
            .sum();

        let req = CompletionRequest {
            messages: self.session.messages.clone(),
            tools: schemas,
            stream: true,
        };

        let mut stream = tokio::select! {
            biased;
            _ = &mut *cancel => {
                return Ok(StreamOutcome::Aborted { text: String::new() });
            }
            result = self.model.complete(req.clone()) => result.map_err(TurnError::Model)?,
        };

        let mut text = String::new();
        let mut calls: Vec<FinishedCall> = Vec::new();
        let mut restarted = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *cancel => {
                    return Ok(StreamOutcome::Aborted { text });
                }
                ev = stream.next() => ev,
            };

            match event {
                None => break,
                Some(Err(e)) => {
                    if matches!(e, ModelError::Protocol(_)) && !restarted {
                        // One restart of the stream is permitted; anything
                        // already forwarded is superseded by the fresh run.
                        warn!(error = %e, "protocol error; restarting stream once");
                        restarted = true;
                        text.clear();
                        calls.clear();
                        stream = self
                            .model
                            .complete(req.clone())
                            .await
                            .map_err(TurnError::Model)?;
                        continue;
                    }
                    return Err(TurnError::Model(e));
                }
                Some(Ok(ev)) => match ev {
                    ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                        text.push_str(&delta);
                        let _ = tx.send(AgentEvent::TextDelta(delta)).await;
                    }
                    ResponseEvent::TextDelta(_) => {}
                    ResponseEvent::ThinkingDelta(delta) => {
                        let _ = tx.send(AgentEvent::ThinkingDelta(delta)).await;
                    }
                    ResponseEvent::ToolCallStarted { name, .. } => {
                        let _ = tx.send(AgentEvent::Status(format!("running {name}"))).await;
                    }
                    ResponseEvent::ToolCallFinished {
                        id,
                        name,
                        arguments,
                        malformed,
                    } => {
                        calls.push(FinishedCall {
                            id,
                            name,
                            arguments,
                            malformed,
                        });
                    }
                    ResponseEvent::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        self.session.note_usage(input_tokens);
                        let _ = tx
                            .send(AgentEvent::TokenUsage {
                                input: input_tokens,
                                output: output_tokens,
                                context_tokens: self.session.effective_tokens(),
                                max_tokens: self.session.max_tokens,
                            })
                            .await;
                    }
                    ResponseEvent::Stop(reason) => {
                        debug!(stop_reason = %reason, "provider reported stop");
                        if reason == StopReason::Length {
                            let _ = tx
                                .send(AgentEvent::Status(
                                    "response truncated by output token limit".into(),
                                ))
                                .await;
                        }
                    }
                    ResponseEvent::Done => break,
                    ResponseEvent::Error(msg) => {
                        warn!("model stream error: {msg}");
                    }
                },
            }
        }

        Ok(StreamOutcome::Completed { text, calls })
    }

    /// Pre-request budget gate: trim the oldest unprotected history into the
    /// long-term archive when the estimate approaches the window.  Archive
    /// write failures are non-fatal (the trim itself already happened).
    async fn trim_if_needed(&mut self, tx: &mpsc::Sender<AgentEvent>) -> Result<(), TurnError> {
        let Some(outcome) = trim::trim_to_budget(
            &mut self.session,
            self.config.trim_threshold,
            self.config.keep_recent_turns,
        ) else {
            return Ok(());
        };

        for msg in &outcome.archived {
            if let Err(e) = self.longterm.append_message(msg) {
                warn!(error = %e, "failed to archive trimmed message");
            }
        }
        let _ = tx
            .send(AgentEvent::ContextTrimmed {
                archived: outcome.archived.len(),
                tokens_before: outcome.tokens_before,
                tokens_after: outcome.tokens_after,
            })
            .await;
        Ok(())
    }

    fn document(&self) -> SessionDocument {
        SessionDocument {
            id: self.session.id.clone(),
            created_at: self.session.created_at,
            updated_at: Utc::now(),
            provider: self.model.name().to_string(),
            model: self.model.model_name().to_string(),
            config: serde_json::to_value(&*self.config).unwrap_or_default(),
            messages: self.session.messages.clone(),
        }
    }

    fn persist(&self) -> Result<(), TurnError> {
        self.store
            .save(&self.document())
            .map_err(|e| TurnError::Persistence(e.to_string()))
    }
}

/// Both an explicit send and a dropped sender count as cancellation;
/// `try_recv` returns `Err(Closed)` in the dropped case, which a plain
/// `.is_ok()` check would miss.
fn cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
