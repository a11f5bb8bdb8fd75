// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in tool that runs a shell command and captures stdout + stderr.
///
/// Oversized output is not truncated here — the result store spills it and
/// hands the model a preview plus retrieval instructions.
pub struct ShellTool {
    pub workdir: PathBuf,
    pub timeout_secs: u64,
}

impl ShellTool {
    pub fn new(workdir: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            workdir: workdir.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'command' is any bash one-liner. Prefer non-interactive commands; \
         avoid commands that require a TTY. The exit status is reported; \
         exit 1 (no matches / condition false) is not treated as a failure."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to the session workdir)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command'"),
        };
        let workdir = call
            .args
            .get("workdir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.workdir.clone());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing shell tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&workdir);
        // `stdin(Stdio::null())` keeps the subprocess away from the
        // controlling terminal via fd 0; `kill_on_drop` ensures the child is
        // killed when the timeout fires and the future is dropped.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // setsid() detaches the child from the controlling terminal entirely:
        // open("/dev/tty") fails with ENXIO, so a misbehaving subprocess
        // cannot flip the parent terminal out of cooked mode.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&stderr);
                }

                let code = output.status.code().unwrap_or(-1);
                if content.is_empty() {
                    content = format!("[exit {code}]");
                }
                let action = format!("ran `{}`", first_line(&command));
                if code == 0 {
                    ToolOutput::ok_with_action(&call.id, content, action)
                } else if code == 1 {
                    // Exit code 1 is the Unix convention for "no matches"
                    // (grep) and "condition false" (test); flagging it as an
                    // error would mislead the model about the command itself.
                    ToolOutput::ok_with_action(&call.id, format!("[exit 1]\n{content}"), action)
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new("/tmp", 10)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "s1".into(),
            name: "shell".into(),
            args,
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = tool().execute(&call(json!({"command": "echo hello"}))).await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hello");
        assert!(out.action.as_deref().unwrap_or("").contains("echo hello"));
    }

    #[tokio::test]
    async fn captures_stderr_with_marker() {
        let out = tool()
            .execute(&call(json!({"command": "echo oops 1>&2"})))
            .await;
        assert!(out.content.contains("[stderr]"));
        assert!(out.content.contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let out = tool().execute(&call(json!({"command": "exit 3"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 3]"));
    }

    #[tokio::test]
    async fn exit_one_is_not_an_error() {
        let out = tool().execute(&call(json!({"command": "false"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let out = tool()
            .execute(&call(json!({"command": "sleep 30", "timeout_secs": 1})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let out = tool().execute(&call(json!({}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn workdir_argument_is_honored() {
        let out = tool()
            .execute(&call(json!({"command": "pwd", "workdir": "/"})))
            .await;
        assert_eq!(out.content.trim(), "/");
    }
}
