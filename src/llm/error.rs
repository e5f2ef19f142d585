//! LLM error types with retry classification.
//!
//! Transient failures (rate limits, 5xx, network) are retried by the client
//! when retries are enabled; everything else is surfaced immediately and the
//! synthesizer degrades to an empty answer.

use std::time::Duration;

use thiserror::Error;

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 - retry with backoff
    RateLimited,
    /// 5xx - retry
    ServerError,
    /// 4xx other than 429 (quota, auth, unknown model) - permanent
    ClientError,
    /// Connection failure or timeout - retry
    NetworkError,
    /// Body did not match the expected shape - permanent
    ParseError,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
        };
        f.write_str(label)
    }
}

/// Error from LLM API calls.
#[derive(Debug, Error)]
#[error("{kind}{}: {message}", .status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// Server-provided delay (Retry-After)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    /// Build an error from a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify_http_status(status),
            status_code: Some(status),
            message,
            retry_after,
        }
    }

    pub fn network_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            status_code: None,
            message,
            retry_after: None,
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            status_code: None,
            message,
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before retry `attempt` (0-based): Retry-After if given, otherwise
    /// exponential backoff from a per-kind base, capped at 30 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let base_secs: u64 = match self.kind {
            LlmErrorKind::RateLimited => 4,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };
        Duration::from_secs(base_secs.saturating_mul(2u64.saturating_pow(attempt)).min(30))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Total time budget across attempts
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// No retries at all (tests, one-shot probes).
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    /// `max_retries` retries within the default time budget; zero means none.
    pub fn with_max_retries(max_retries: u32) -> Self {
        if max_retries == 0 {
            Self::none()
        } else {
            Self {
                max_retries,
                ..Self::default()
            }
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
