// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::authorize::{Authorization, WorkspaceGate};
use crate::tool::{Tool, ToolCall, ToolOutput};

const READ_LIMIT: usize = 200_000;
const LIST_LIMIT: usize = 100;
const SEARCH_LIMIT: usize = 100;

static EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules", ".svn", "__pycache__"];

/// Built-in multi-operation filesystem tool.
///
/// One schema covers all operations; the per-operation argument checks live
/// in the dispatcher.  Mutating operations consult the workspace gate and
/// return an authorization-required error when the target falls outside the
/// working directory.
pub struct FsTool {
    gate: Arc<WorkspaceGate>,
}

impl FsTool {
    pub fn new(gate: Arc<WorkspaceGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for FsTool {
    fn name(&self) -> &str {
        "fs"
    }

    fn description(&self) -> &str {
        "File system operations. Operations:\n\
         - read: read a file (optional offset/limit in lines)\n\
         - list: list directory contents (optional depth, default 2, max 5)\n\
         - search: find files whose names contain 'query' (case-insensitive)\n\
         - write: write 'content' to a file, creating parent directories\n\
         - append: append 'content' to a file\n\
         - delete: delete a file or empty directory\n\
         - rename: rename/move 'path' to 'target'\n\
         - create_directory: create a directory (and parents)\n\
         Mutations outside the working directory require user authorization."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "list", "search", "write", "append",
                             "delete", "rename", "create_directory"],
                    "description": "File system operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Target file or directory path"
                },
                "content": {
                    "type": "string",
                    "description": "Text content (write/append only)"
                },
                "target": {
                    "type": "string",
                    "description": "Destination path (rename only)"
                },
                "query": {
                    "type": "string",
                    "description": "Filename substring (search only)"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to read, 0-based (read only)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum lines to read (read only)"
                },
                "depth": {
                    "type": "integer",
                    "description": "Recursion depth (list only; default 2, max 5)"
                }
            },
            "required": ["operation", "path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let op = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(o) => o.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'operation'"),
        };
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => self.gate.resolve(Path::new(p)),
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };

        debug!(op = %op, path = %path.display(), "fs tool");

        match op.as_str() {
            "read" => self.read(call, &path).await,
            "list" => self.list(call, &path).await,
            "search" => self.search(call, &path).await,
            "write" => self.write(call, &path, false).await,
            "append" => self.write(call, &path, true).await,
            "delete" => self.delete(call, &path).await,
            "rename" => self.rename(call, &path).await,
            "create_directory" => self.create_directory(call, &path).await,
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}

impl FsTool {
    fn gate_mutation(&self, call: &ToolCall, path: &Path, op: &str) -> Option<ToolOutput> {
        match self.gate.check_mutation(path, op) {
            Authorization::Allowed => None,
            Authorization::Required { reason } => Some(ToolOutput::err(&call.id, reason)),
        }
    }

    async fn read(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        if let Authorization::Required { reason } = self.gate.check_read(path) {
            return ToolOutput::err(&call.id, reason);
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        let text = String::from_utf8_lossy(&bytes);

        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        let content = if offset > 0 || limit.is_some() {
            let lines: Vec<&str> = text.lines().collect();
            let end = limit
                .map(|l| (offset + l).min(lines.len()))
                .unwrap_or(lines.len());
            if offset >= lines.len() {
                String::new()
            } else {
                lines[offset..end].join("\n")
            }
        } else {
            text.to_string()
        };

        let content = if content.len() > READ_LIMIT {
            format!("{}...[truncated]", &content[..READ_LIMIT])
        } else {
            content
        };
        ToolOutput::ok_with_action(&call.id, content, format!("read {}", path.display()))
    }

    async fn list(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        if let Authorization::Required { reason } = self.gate.check_read(path) {
            return ToolOutput::err(&call.id, reason);
        }
        let depth = call
            .args
            .get("depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(2)
            .min(5) as usize;

        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return ToolOutput::err(&call.id, format!("not a directory: {}", path.display())),
            Err(e) => return ToolOutput::err(&call.id, format!("cannot access {}: {e}", path.display())),
        }

        let mut entries: Vec<String> = Vec::new();
        let mut truncated = false;
        collect_entries(path, path, 0, depth, LIST_LIMIT, &mut entries, &mut truncated).await;

        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty directory)");
        }
        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n...[output truncated at {LIST_LIMIT} entries]"));
        }
        ToolOutput::ok_with_action(&call.id, output, format!("listed {}", path.display()))
    }

    async fn search(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.is_empty() => q.to_lowercase(),
            _ => return ToolOutput::err(&call.id, "search requires a non-empty 'query'"),
        };
        if let Authorization::Required { reason } = self.gate.check_read(path) {
            return ToolOutput::err(&call.id, reason);
        }

        let root = path.to_path_buf();
        // walkdir is synchronous; run it off the async executor.
        let result = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            for entry in walkdir::WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| !EXCLUDED_DIRS.contains(&n))
                        .unwrap_or(true)
                })
                .filter_map(|e| e.ok())
            {
                if matches.len() >= SEARCH_LIMIT {
                    break;
                }
                let name = entry.file_name().to_string_lossy().to_lowercase();
                if name.contains(&query) {
                    matches.push(entry.path().display().to_string());
                }
            }
            matches
        })
        .await;

        match result {
            Ok(matches) if matches.is_empty() => ToolOutput::ok(&call.id, "(no matches)"),
            Ok(matches) => {
                let count = matches.len();
                ToolOutput::ok_with_action(
                    &call.id,
                    matches.join("\n"),
                    format!("found {count} matching files"),
                )
            }
            Err(e) => ToolOutput::err(&call.id, format!("search failed: {e}")),
        }
    }

    async fn write(&self, call: &ToolCall, path: &Path, append: bool) -> ToolOutput {
        let op = if append { "append" } else { "write" };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => {
                return ToolOutput::err(
                    &call.id,
                    format!("{op} requires a 'content' field but it is missing"),
                )
            }
        };
        if let Some(denied) = self.gate_mutation(call, path, op) {
            return denied;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(&call.id, format!("cannot create parent: {e}"));
                }
            }
        }
        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await
            {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(path, content).await
        };
        match result {
            Ok(()) => {
                let verb = if append { "appended" } else { "wrote" };
                ToolOutput::ok_with_action(
                    &call.id,
                    format!("{verb} {} bytes to {}", content.len(), path.display()),
                    format!("{verb} {} bytes to {}", content.len(), path.display()),
                )
            }
            Err(e) => ToolOutput::err(&call.id, format!("{op} error: {e}")),
        }
    }

    async fn delete(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        if let Some(denied) = self.gate_mutation(call, path, "delete") {
            return denied;
        }
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot access {}: {e}", path.display())),
        };
        let result = if meta.is_dir() {
            // Only empty directories; recursive removal stays a user decision.
            tokio::fs::remove_dir(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => ToolOutput::ok_with_action(
                &call.id,
                format!("deleted {}", path.display()),
                format!("deleted {}", path.display()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
        }
    }

    async fn rename(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        let target: PathBuf = match call.args.get("target").and_then(|v| v.as_str()) {
            Some(t) => self.gate.resolve(Path::new(t)),
            None => return ToolOutput::err(&call.id, "rename requires a 'target' path"),
        };
        if let Some(denied) = self.gate_mutation(call, path, "rename") {
            return denied;
        }
        if let Some(denied) = self.gate_mutation(call, &target, "rename") {
            return denied;
        }
        match tokio::fs::rename(path, &target).await {
            Ok(()) => ToolOutput::ok_with_action(
                &call.id,
                format!("renamed {} to {}", path.display(), target.display()),
                format!("renamed {} to {}", path.display(), target.display()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("rename error: {e}")),
        }
    }

    async fn create_directory(&self, call: &ToolCall, path: &Path) -> ToolOutput {
        if let Some(denied) = self.gate_mutation(call, path, "create_directory") {
            return denied;
        }
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => ToolOutput::ok_with_action(
                &call.id,
                format!("created directory {}", path.display()),
                format!("created directory {}", path.display()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("create_directory error: {e}")),
        }
    }
}

fn relative_path(base: &Path, full: &Path) -> String {
    full.strip_prefix(base)
        .unwrap_or(full)
        .display()
        .to_string()
}

#[async_recursion::async_recursion]
async fn collect_entries(
    base: &Path,
    dir: &Path,
    current_depth: usize,
    max_depth: usize,
    limit: usize,
    entries: &mut Vec<String>,
    truncated: &mut bool,
) {
    if entries.len() >= limit {
        *truncated = true;
        return;
    }
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return,
    };

    let mut children: Vec<(String, bool)> = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        children.push((name, is_dir));
    }
    children.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then(a.cmp(b)));

    for (name, is_dir) in children {
        if entries.len() >= limit {
            *truncated = true;
            return;
        }
        let full_path = dir.join(&name);
        let rel = relative_path(base, &full_path);
        if is_dir {
            entries.push(format!("{rel}/"));
            if current_depth < max_depth && !EXCLUDED_DIRS.contains(&name.as_str()) {
                collect_entries(
                    base,
                    &full_path,
                    current_depth + 1,
                    max_depth,
                    limit,
                    entries,
                    truncated,
                )
                .await;
            }
        } else {
            entries.push(rel);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
