// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Classified provider failures.
///
/// The retry fabric keys off [`ModelError::is_retryable`]; everything else
/// either surfaces to the user as the turn's result or (for tool paths)
/// becomes a model-visible error output.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Network, DNS, TLS, or timeout failure before/while reading the body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status that is neither auth nor rate-limit.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 429 or provider-specific throttle signal.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 401/403 — surfaces to the user, never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed SSE or an unparseable event past tolerance.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The per-turn cancel handle was tripped.
    #[error("request cancelled")]
    Cancelled,
}

impl ModelError {
    /// Map an HTTP error status to the right variant.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ModelError::Auth(body),
            429 => ModelError::RateLimited { retry_after },
            _ => ModelError::Http { status, body },
        }
    }

    /// Whether the retry fabric may silently retry this failure.
    /// 408 and 429 are the only retryable 4xx; all 5xx retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(_) => true,
            ModelError::RateLimited { .. } => true,
            ModelError::Http { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Provider-requested delay before the next attempt, when present.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Transport(e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_maps_to_auth() {
        let e = ModelError::from_status(401, "bad key".into(), None);
        assert!(matches!(e, ModelError::Auth(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn status_429_maps_to_rate_limited_with_delay() {
        let e = ModelError::from_status(429, String::new(), Some(Duration::from_secs(30)));
        assert!(e.is_retryable());
        assert_eq!(e.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn status_500_is_retryable() {
        let e = ModelError::from_status(500, "oops".into(), None);
        assert!(e.is_retryable());
    }

    #[test]
    fn status_408_is_retryable() {
        assert!(ModelError::from_status(408, String::new(), None).is_retryable());
    }

    #[test]
    fn status_404_is_not_retryable() {
        assert!(!ModelError::from_status(404, String::new(), None).is_retryable());
    }

    #[test]
    fn transport_is_retryable() {
        assert!(ModelError::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn protocol_and_cancelled_are_not_retryable() {
        assert!(!ModelError::Protocol("bad frame".into()).is_retryable());
        assert!(!ModelError::Cancelled.is_retryable());
    }
}
