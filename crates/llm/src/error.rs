//! Classified LLM errors.
//!
//! Callers decide whether to retry from `is_transient`, so every provider maps
//! its failures onto these variants instead of free-form strings.

use bundlescope_core::AppError;
use std::time::Duration;
use thiserror::Error;

/// Error returned by an `LlmClient`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// The request did not complete within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The provider could not be reached
    #[error("connection failed: {0}")]
    Connect(String),

    /// The provider answered with a non-success HTTP status
    #[error("provider returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The response body was not in the expected format
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The client was misconfigured (missing key, unknown provider)
    #[error("client configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, 408, 429 and 5xx are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::Connect(_) => true,
            LlmError::Status { status, .. } => {
                matches!(status, 408 | 425 | 429) || (500..600).contains(status)
            }
            LlmError::Decode(_) => true,
            LlmError::Config(_) => false,
        }
    }

    /// Whether the provider rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, LlmError::Status { status: 401 | 403, .. })
    }

    /// Minimum delay the provider asked for before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Build a status error, reading `Retry-After` (seconds) when present.
    pub fn from_status(status: u16, message: String, retry_after: Option<&str>) -> Self {
        let retry_after = retry_after
            .and_then(|value| value.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        LlmError::Status {
            status,
            message,
            retry_after,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            LlmError::Connect(err.to_string())
        } else if err.is_decode() || err.is_body() {
            LlmError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            LlmError::Connect(err.to_string())
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        AppError::Llm(err.to_string())
    }
}

/// Convenience alias for LLM results.
pub type LlmResult<T> = Result<T, LlmError>;
