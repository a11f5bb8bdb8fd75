// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{error::ModelError, CompletionRequest, ResponseEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a stream of decoded events.
    ///
    /// The returned stream is stateful: partial tool-call argument JSON is
    /// accumulated inside the decoder and surfaced as a single
    /// [`ResponseEvent::ToolCallFinished`] when the block closes.
    async fn complete(&self, req: CompletionRequest) -> Result<EventStream, ModelError>;
}
