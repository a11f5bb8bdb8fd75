// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
pub mod authorize;
pub mod builtin;
pub mod redact;
pub mod registry;
pub mod result_store;
pub mod tool;

pub use authorize::{Authorization, WorkspaceGate};
pub use redact::Redactor;
pub use registry::{ToolRegistry, ToolSchema};
pub use result_store::{Chunk, StoreError, ToolResultStore, INLINE_THRESHOLD, MAX_CHUNK_BYTES};
pub use tool::{Tool, ToolCall, ToolOutput};

pub use builtin::fs::FsTool;
pub use builtin::read_tool_result::ReadToolResultTool;
pub use builtin::shell::ShellTool;
pub use builtin::web_fetch::WebFetchTool;
