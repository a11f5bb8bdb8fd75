// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "yawl",
    about = "A terminal AI coding agent",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Initial prompt.  When omitted and stdin is piped, input is read from
    /// stdin; otherwise an interactive line loop starts.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Use this session id instead of generating one.
    #[arg(long, short = 's', value_name = "ID")]
    pub session: Option<String>,

    /// Start a fresh session even when --session names an existing one.
    #[arg(long)]
    pub new_session: bool,

    /// Resume a saved conversation by session id.
    #[arg(long, value_name = "ID")]
    pub resume: Option<String>,

    /// Exit after a single turn (CI / scripting mode).
    #[arg(long)]
    pub once: bool,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List saved sessions
    Sessions {
        /// Maximum number of sessions to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Print the effective configuration and exit
    ShowConfig,
}

impl Cli {
    /// True when the run should not start the interactive loop: an explicit
    /// prompt, `--once`, or piped stdin/stdout.
    pub fn is_headless(&self) -> bool {
        self.once
            || self.prompt.is_some()
            || !stdin_is_tty()
            || !stdout_is_tty()
    }
}

pub fn stdin_is_tty() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(0) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

pub fn stdout_is_tty() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(1) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
