// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly turned
/// off need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "anthropic" | "mock", or any
    /// OpenAI-compatible gateway served through the `openai` driver with a
    /// `base_url` override.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or self-hosted gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context window of the model, in tokens.  Drives the trim policy.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Tokens-per-whitespace-word factor used by the local estimator.
    /// The provider's usage reports remain authoritative; this only decides
    /// when trimming fires.
    #[serde(default = "default_token_factor")]
    pub token_factor: f32,
    /// Wall-clock cap for a single completion request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Inactivity cap: abort the stream when no bytes arrive for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_context_window() -> usize {
    128_000
}
fn default_token_factor() -> f32 {
    1.3
}
fn default_request_timeout() -> u64 {
    600
}
fn default_idle_timeout() -> u64 {
    90
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            context_window: default_context_window(),
            token_factor: default_token_factor(),
            request_timeout_secs: default_request_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model ↔ tool round-trips within one user turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Token fraction of the context window at which trimming triggers.
    #[serde(default = "default_trim_threshold")]
    pub trim_threshold: f32,
    /// Number of most-recent conversation turns preserved verbatim by the
    /// trim policy.  A turn starts at each user message.
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    /// System prompt override; None uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Page size for recall search results returned to the model.
    #[serde(default = "default_recall_page_size")]
    pub recall_page_size: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_trim_threshold() -> f32 {
    0.85
}
fn default_keep_recent_turns() -> usize {
    8
}
fn default_recall_page_size() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            trim_threshold: default_trim_threshold(),
            keep_recent_turns: default_keep_recent_turns(),
            system_prompt: None,
            recall_page_size: default_recall_page_size(),
        }
    }
}

/// How aggressively tool outputs are scrubbed before reaching the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedactionLevel {
    Off,
    #[default]
    Standard,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Allow read operations outside the session working directory.
    /// Mutations outside the working directory always require authorization.
    #[serde(default = "default_true")]
    pub unrestricted_reads: bool,
    /// Default timeout for shell tool commands, in seconds.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Secrets redaction applied to tool outputs.
    #[serde(default)]
    pub redaction: RedactionLevel,
}

fn default_shell_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            unrestricted_reads: true,
            shell_timeout_secs: default_shell_timeout(),
            redaction: RedactionLevel::Standard,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session storage root.  Overridden by YAWL_SESSION_DIR; defaults to
    /// the platform data directory.
    #[serde(default)]
    pub root: Option<String>,
    /// Path to a custom-instructions file appended to the system prompt.
    /// Overridden by YAWL_INSTRUCTIONS.
    #[serde(default)]
    pub instructions_file: Option<String>,
}

impl SessionConfig {
    /// Resolve the effective session root: env var, then config, then the
    /// platform data directory.
    pub fn resolve_root(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("YAWL_SESSION_DIR") {
            return PathBuf::from(shellexpand::tilde(&dir).to_string());
        }
        if let Some(root) = &self.root {
            return PathBuf::from(shellexpand::tilde(root).to_string());
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("yawl")
    }

    /// Resolve the custom-instructions path, if any.
    pub fn resolve_instructions(&self) -> Option<PathBuf> {
        if let Ok(p) = std::env::var("YAWL_INSTRUCTIONS") {
            return Some(PathBuf::from(shellexpand::tilde(&p).to_string()));
        }
        self.instructions_file
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_openai() {
        let cfg = Config::default();
        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.model.name, "gpt-4o");
    }

    #[test]
    fn default_agent_limits() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_iterations, 25);
        assert_eq!(cfg.keep_recent_turns, 8);
        assert!((cfg.trim_threshold - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn redaction_defaults_to_standard() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.redaction, RedactionLevel::Standard);
    }

    #[test]
    fn redaction_level_serializes_lowercase() {
        let s = serde_json::to_string(&RedactionLevel::Strict).unwrap();
        assert_eq!(s, "\"strict\"");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{ "model": { "provider": "anthropic", "name": "m" } }"#)
                .unwrap();
        assert_eq!(cfg.model.provider, "anthropic");
        assert_eq!(cfg.agent.max_iterations, 25);
        assert!(cfg.tools.unrestricted_reads);
    }

    #[test]
    fn session_root_env_override_wins() {
        std::env::set_var("YAWL_SESSION_DIR", "/tmp/yawl-test-root");
        let cfg = SessionConfig {
            root: Some("/elsewhere".into()),
            instructions_file: None,
        };
        assert_eq!(cfg.resolve_root(), PathBuf::from("/tmp/yawl-test-root"));
        std::env::remove_var("YAWL_SESSION_DIR");
    }
}
