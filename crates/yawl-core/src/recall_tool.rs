// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use yawl_tools::{Tool, ToolCall, ToolOutput};

use crate::longterm::LongTermLog;

/// Built-in tool exposing the long-term archive to the model.
///
/// Lives in the core crate because it needs the session's archive handle;
/// registered alongside the ordinary built-ins.
pub struct RecallTool {
    log: Arc<LongTermLog>,
    page_size: usize,
}

impl RecallTool {
    pub fn new(log: Arc<LongTermLog>, page_size: usize) -> Self {
        Self { log, page_size }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search earlier conversation history that was trimmed out of the \
         active context. Case-insensitive substring match over archived \
         messages; results are paginated (pass 'page' for more). Use this \
         when the user refers to something discussed earlier that you no \
         longer see."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Substring to search for (empty matches nothing)"
                },
                "page": {
                    "type": "integer",
                    "description": "Result page, 0-based (default 0)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = call
            .args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let page = call.args.get("page").and_then(|v| v.as_u64()).unwrap_or(0) as usize;

        debug!(query = %query, page, "recall tool");

        let hits = match self.log.search(query, self.page_size, page) {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, format!("archive read failed: {e}")),
        };

        if hits.is_empty() {
            return ToolOutput::ok(&call.id, "0 matches");
        }

        let mut out = String::new();
        for (i, entry) in hits.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{} @ {}] {}\n",
                page * self.page_size + i + 1,
                entry.role,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.content
            ));
        }
        if hits.len() == self.page_size {
            out.push_str(&format!(
                "[more results may exist; retry with \"page\": {}]",
                page + 1
            ));
        }
        ToolOutput::ok_with_action(
            &call.id,
            out,
            format!("recalled {} archived messages", hits.len()),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
