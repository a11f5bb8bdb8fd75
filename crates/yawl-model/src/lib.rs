// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
pub mod retry;
mod anthropic;
mod error;
mod mock;
mod openai_compat;
mod provider;
pub(crate) mod sse;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::ModelError;
pub use mock::{MockProvider, ScriptedProvider};
pub use openai_compat::{AuthStyle, OpenAICompatProvider};
pub use provider::{EventStream, ModelProvider};
pub use types::*;

use std::time::Duration;

use anyhow::bail;
use yawl_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// `provider = "anthropic"` selects the Messages adapter, `"mock"` the
/// deterministic offline provider, and `"openai"` — or any other id combined
/// with a `base_url` — the OpenAI-compatible adapter.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let key = resolve_api_key(cfg);
    let request_timeout = Duration::from_secs(cfg.request_timeout_secs);
    let idle_timeout = Duration::from_secs(cfg.idle_timeout_secs);

    match cfg.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            request_timeout,
            idle_timeout,
        ))),
        "openai" => Ok(Box::new(OpenAICompatProvider::new(
            "openai",
            cfg.name.clone(),
            key,
            cfg.base_url.as_deref().unwrap_or("https://api.openai.com/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
            AuthStyle::Bearer,
            request_timeout,
            idle_timeout,
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => {
            // Any OpenAI-compatible gateway works through the generic driver
            // as long as the endpoint is configured explicitly.
            let Some(base) = cfg.base_url.as_deref() else {
                bail!("unknown provider '{other}' (set base_url to use an OpenAI-compatible endpoint)");
            };
            Ok(Box::new(OpenAICompatProvider::new(
                other.to_string(),
                cfg.name.clone(),
                key,
                base,
                cfg.max_tokens,
                cfg.temperature,
                vec![],
                AuthStyle::Bearer,
                request_timeout,
                idle_timeout,
            )))
        }
    }
}

/// Resolve the API key: explicit config value, then the configured env var,
/// then the provider's canonical env var.
fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        if let Ok(k) = std::env::var(var) {
            return Some(k);
        }
    }
    let canonical = match cfg.provider.as_str() {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        _ => return None,
    };
    std::env::var(canonical).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
