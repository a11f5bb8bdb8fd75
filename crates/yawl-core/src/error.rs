// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use yawl_model::ModelError;

/// Turn-level failures surfaced to the caller.
///
/// Tool failures never appear here — they become model-visible error results
/// inside the conversation.  Whatever happens, the conversation is left in a
/// legal state: the assistant message is either fully appended or absent.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("iteration cap reached after {iterations} tool rounds; stopping this turn")]
    IterationCap { iterations: u32 },

    #[error("session persistence failed: {0}")]
    Persistence(String),
}
