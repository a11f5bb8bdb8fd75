// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// One framed record on the broker wire.  Every message names the sub-agent
/// it concerns; the coordinator holds id 0 implicitly and never appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// First message on every connection: the sub-agent registers itself.
    Connect { agent_id: u32, pid: u32 },
    /// Coordinator → sub-agent: run this prompt.
    Task { agent_id: u32, prompt: String },
    /// Sub-agent → coordinator: progress note.
    Status { agent_id: u32, note: String },
    /// Sub-agent → coordinator: the current task finished.
    Completed {
        agent_id: u32,
        summary: Option<String>,
    },
    /// Sub-agent → coordinator: cannot proceed.
    Blocked { agent_id: u32, reason: String },
    /// Either direction: the connection is going away.
    Disconnect { agent_id: u32 },
}

impl BrokerMessage {
    pub fn agent_id(&self) -> u32 {
        match self {
            BrokerMessage::Connect { agent_id, .. }
            | BrokerMessage::Task { agent_id, .. }
            | BrokerMessage::Status { agent_id, .. }
            | BrokerMessage::Completed { agent_id, .. }
            | BrokerMessage::Blocked { agent_id, .. }
            | BrokerMessage::Disconnect { agent_id } => *agent_id,
        }
    }
}

/// Encode one message as a single newline-terminated JSON line.
pub fn encode_line(msg: &BrokerMessage) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line from the wire.
pub fn decode_line(line: &str) -> anyhow::Result<BrokerMessage> {
    Ok(serde_json::from_str(line.trim())?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
