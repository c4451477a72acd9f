//! Analyzer capability.
//!
//! The orchestrator only knows `ChunkAnalyzer::analyze`. Providers classify
//! their failures as transient or permanent through `AnalyzerError`; the
//! orchestrator retries the former and records the latter.

mod heuristic;
mod llm;

pub use heuristic::HeuristicAnalyzer;
pub use llm::{LlmAnalyzer, LlmAnalyzerOptions};

use crate::chunk::Chunk;
use crate::types::Severity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One chunk handed to an analyzer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    pub chunk: &'a Chunk,
    /// Context plus primary text
    pub text: &'a str,
    /// Absolute offset of the first byte of `text`
    pub text_offset: usize,
}

impl ChunkRequest<'_> {
    /// Bytes of `text` that are overlap context.
    pub fn context_len(&self) -> usize {
        self.chunk.byte_range.start - self.chunk.context_start
    }
}

/// A finding as reported by an analyzer, relative to `ChunkRequest::text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFinding {
    pub category: String,
    pub severity: Severity,
    pub confidence: f64,
    /// Byte offset into the request text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// 1-based line within the request text, used when `offset` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Classified analyzer failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("analyzer timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    /// The analyzer answered but the payload could not be used
    #[error("invalid analyzer response: {0}")]
    InvalidResponse(String),

    /// The input was refused (too large, policy, malformed request)
    #[error("chunk rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Serializable kind of an `AnalyzerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalyzerErrorKind {
    Timeout,
    RateLimited,
    Unavailable,
    InvalidResponse,
    Rejected,
    Unauthorized,
}

impl AnalyzerError {
    pub fn kind(&self) -> AnalyzerErrorKind {
        match self {
            Self::Timeout(_) => AnalyzerErrorKind::Timeout,
            Self::RateLimited { .. } => AnalyzerErrorKind::RateLimited,
            Self::Unavailable(_) => AnalyzerErrorKind::Unavailable,
            Self::InvalidResponse(_) => AnalyzerErrorKind::InvalidResponse,
            Self::Rejected(_) => AnalyzerErrorKind::Rejected,
            Self::Unauthorized(_) => AnalyzerErrorKind::Unauthorized,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Minimum wait the provider asked for.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl AnalyzerErrorKind {
    /// Timeouts, rate limits, unavailability and unusable responses are retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Unavailable | Self::InvalidResponse
        )
    }
}

/// Single-chunk analysis capability.
#[async_trait]
pub trait ChunkAnalyzer: Send + Sync {
    /// Identity recorded in the result.
    fn name(&self) -> &str;

    async fn analyze(&self, request: &ChunkRequest<'_>) -> Result<Vec<ChunkFinding>, AnalyzerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(AnalyzerError::Timeout("t".into()).is_transient());
        assert!(AnalyzerError::Unavailable("503".into()).is_transient());
        assert!(AnalyzerError::InvalidResponse("junk".into()).is_transient());
        assert!(!AnalyzerError::Rejected("too big".into()).is_transient());
        assert!(!AnalyzerError::Unauthorized("401".into()).is_transient());

        let limited = AnalyzerError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(limited.is_transient());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(limited.kind(), AnalyzerErrorKind::RateLimited);
    }

    #[test]
    fn test_finding_deserializes_with_optional_fields() {
        let finding: ChunkFinding = serde_json::from_str(
            r#"{"category":"xss","severity":"high","confidence":0.8,"line":3,"description":"d"}"#,
        )
        .unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.offset, None);
        assert_eq!(finding.line, Some(3));
    }
}
