// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

/// Assemble the pinned system prompt.
///
/// `custom` replaces the built-in prompt entirely; `instructions` (the
/// custom-instructions file contents) is appended in both cases.
pub fn system_prompt(
    custom: Option<&str>,
    instructions: Option<&str>,
    workdir: &Path,
) -> String {
    let mut prompt = match custom {
        Some(text) => text.to_string(),
        None => format!(
            "You are yawl {}, a coding agent running in a terminal.\n\
             Working directory: {}\n\n\
             Use the available tools to inspect and modify the project. \
             Mutations outside the working directory are refused until the \
             user confirms them. Large tool results are stored; follow the \
             stored_result marker to page through them with read_tool_result. \
             Earlier conversation may have been archived; use the recall tool \
             to search it. Keep answers concise and grounded in what the \
             tools returned.",
            env!("CARGO_PKG_VERSION"),
            workdir.display(),
        ),
    };
    if let Some(extra) = instructions {
        let extra = extra.trim();
        if !extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
