// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Local IPC broker for multi-agent coordination.
//!
//! A coordinator process binds a Unix socket under a per-session rendezvous
//! directory; sub-agent processes connect on startup, register with their
//! agent id and pid, receive delegated tasks, and report status until
//! disconnect.  Framing is newline-delimited JSON.

mod broker;
mod protocol;
mod spawn;

pub use broker::{allocate_agent_id, rendezvous_dir, Broker, BrokerClient};
pub use protocol::{decode_line, encode_line, BrokerMessage};
pub use spawn::{pid_alive, spawn_subagent, SubAgentSpec};
