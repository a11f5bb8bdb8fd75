// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only archive of trimmed conversation history.
//!
//! One JSONL file per session (`longterm.log`); each line is a
//! self-describing record.  Ordering is append order.  The recall tool
//! exposes case-folded substring search over the content so the model can
//! pull archived context back into the active turn.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use yawl_model::{Message, MessageContent, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

pub struct LongTermLog {
    path: PathBuf,
}

impl LongTermLog {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            path: session_dir.join("longterm.log"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LongTermEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(f, "{line}")
    }

    /// Archive a trimmed message with its original role, stamped now.
    pub fn append_message(&self, msg: &Message) -> std::io::Result<()> {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let content = match &msg.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::ToolCall { function, .. } => {
                format!("[tool_call {}({})]", function.name, function.arguments)
            }
            MessageContent::ToolResult { content, .. } => content.clone(),
        };
        self.append(&LongTermEntry {
            timestamp: Utc::now(),
            role: role.to_string(),
            content,
        })
    }

    fn read_all(&self) -> std::io::Result<Vec<LongTermEntry>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let f = std::fs::File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A torn trailing line (crash mid-append) is skipped, not fatal.
            if let Ok(entry) = serde_json::from_str::<LongTermEntry>(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Case-folded substring search over content, paginated.
    ///
    /// An empty query matches nothing: matching everything would re-ingest
    /// the very history the trim evicted.
    pub fn search(&self, query: &str, limit: usize, page: usize) -> std::io::Result<Vec<LongTermEntry>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.to_lowercase();
        let matches: Vec<LongTermEntry> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .collect();
        Ok(matches
            .into_iter()
            .skip(page * limit)
            .take(limit)
            .collect())
    }

    /// Read `count` entries starting at `start` (append order).
    pub fn read_range(&self, start: usize, count: usize) -> std::io::Result<Vec<LongTermEntry>> {
        Ok(self.read_all()?.into_iter().skip(start).take(count).collect())
    }

    pub fn len(&self) -> std::io::Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
