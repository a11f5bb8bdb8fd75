// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use tracing::debug;

/// How to launch one sub-agent process.
///
/// The caller (coordinator) is responsible for restoring its own terminal to
/// cooked mode before spawning, so a crash in the child can never leave the
/// shared terminal raw.  The child itself is fully detached: new process
/// group, stdin from /dev/null, stdout/stderr appended to the log file.
pub struct SubAgentSpec {
    /// Path to the yawl binary (usually `std::env::current_exe()`).
    pub program: PathBuf,
    /// Broker session the child should join (exported as YAWL_BROKER_SESSION).
    pub session: String,
    /// Working directory — also the child's authorization scope.
    pub workdir: PathBuf,
    /// Log file receiving the child's stdout and stderr.
    pub log_path: PathBuf,
}

/// Spawn a detached sub-agent; returns its pid.
pub fn spawn_subagent(spec: &SubAgentSpec) -> anyhow::Result<u32> {
    if let Some(parent) = spec.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_path)
        .with_context(|| format!("opening log {}", spec.log_path.display()))?;
    let log_err = log.try_clone()?;

    let mut cmd = std::process::Command::new(&spec.program);
    cmd.current_dir(&spec.workdir)
        .env("YAWL_BROKER_SESSION", &spec.session)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: the child survives the coordinator's terminal
        // signals and never becomes the terminal's foreground job.
        cmd.process_group(0);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", spec.program.display()))?;
    let pid = child.id();
    debug!(pid, session = %spec.session, "spawned sub-agent");
    Ok(pid)
}

/// Whether a process with this pid is still alive (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        pid != 0 && unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Ask a sub-agent to terminate.
pub fn terminate(pid: u32) {
    #[cfg(unix)]
    if pid != 0 {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
