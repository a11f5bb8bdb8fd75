// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::result_store::{ToolResultStore, MAX_CHUNK_BYTES, PREVIEW_BYTES};
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in retrieval operation for spilled tool results.
///
/// When a tool output exceeds the inline threshold the model sees a preview
/// plus a stored-marker naming this tool; it then pages through the stored
/// bytes with (call_id, offset, length).
pub struct ReadToolResultTool {
    store: Arc<ToolResultStore>,
}

impl ReadToolResultTool {
    pub fn new(store: Arc<ToolResultStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadToolResultTool {
    fn name(&self) -> &str {
        "read_tool_result"
    }

    fn description(&self) -> &str {
        "Read a byte range of a stored oversized tool result. Use the call_id \
         from a stored_result marker. offset defaults to 0, length defaults \
         to 8192 (maximum 32768 per call). The response reports total_length, \
         has_more, and next_offset for paging."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "call_id": {
                    "type": "string",
                    "description": "Call id named in the stored_result marker"
                },
                "offset": {
                    "type": "integer",
                    "description": "Byte offset to read from (default 0)"
                },
                "length": {
                    "type": "integer",
                    "description": "Bytes to read (default 8192, max 32768)"
                },
                "session_id": {
                    "type": "string",
                    "description": "Owning session (defaults to the current session)"
                }
            },
            "required": ["call_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let call_id = match call.args.get("call_id").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'call_id'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let length = call
            .args
            .get("length")
            .and_then(|v| v.as_u64())
            .unwrap_or(PREVIEW_BYTES as u64) as usize;
        let session_id = call
            .args
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| self.store.session_id())
            .to_string();

        debug!(call_id = %call_id, offset, length, "read_tool_result tool");

        match self
            .store
            .retrieve_chunk(&call_id, &session_id, offset, length.min(MAX_CHUNK_BYTES))
        {
            Ok(chunk) => {
                let trailer = match chunk.next_offset {
                    Some(next) => format!(
                        "[bytes {}..{} of {}; has_more=true; next_offset={next}]",
                        chunk.offset,
                        chunk.offset + chunk.length,
                        chunk.total_length
                    ),
                    None => format!(
                        "[bytes {}..{} of {}; has_more=false]",
                        chunk.offset,
                        chunk.offset + chunk.length,
                        chunk.total_length
                    ),
                };
                ToolOutput::ok_with_action(
                    &call.id,
                    format!("{}\n{trailer}", chunk.content),
                    format!("read stored result {call_id}"),
                )
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
