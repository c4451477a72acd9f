//! Result document types.
//!
//! `AnalysisResult` is the only structure handed to report renderers. It is
//! serialized with camelCase keys.

use crate::analyzer::AnalyzerErrorKind;
use crate::chunk::ChunkKind;
use crate::source::{ByteRange, Location};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Parse a severity name, accepting a few common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" | "info" | "informational" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A merged finding with an absolute location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub confidence: f64,
    pub location: Location,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Chunk whose outcome produced the kept instance
    pub chunk_id: String,
}

/// Why a chunk was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    LibraryFiltered,
    LowImportance,
    BudgetExceeded,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LibraryFiltered => "library-filtered",
            Self::LowImportance => "low-importance",
            Self::BudgetExceeded => "budget-exceeded",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Final disposition of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ChunkStatus {
    Analyzed,
    #[serde(rename_all = "camelCase")]
    Failed {
        error_kind: AnalyzerErrorKind,
        message: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Per-chunk line in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    pub id: String,
    pub byte_range: ByteRange,
    pub context_start: usize,
    pub kind: ChunkKind,
    pub estimated_tokens: usize,
    pub oversized: bool,
    pub importance: f64,
    #[serde(flatten)]
    pub status: ChunkStatus,
    pub attempts: u32,
    pub findings: usize,
}

/// Non-fatal condition recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunNote {
    #[serde(rename_all = "camelCase")]
    MalformedInputBoundary { offset: usize, reason: String },
    #[serde(rename_all = "camelCase")]
    OversizedUnsplittableChunk {
        chunk_id: String,
        estimated_tokens: usize,
        max_tokens: usize,
    },
    #[serde(rename_all = "camelCase")]
    BudgetExceeded {
        dropped_chunks: usize,
        dropped_tokens: usize,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled { undispatched: usize },
}

impl fmt::Display for RunNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInputBoundary { offset, reason } => {
                write!(f, "no safe boundaries after offset {} ({})", offset, reason)
            }
            Self::OversizedUnsplittableChunk {
                chunk_id,
                estimated_tokens,
                max_tokens,
            } => write!(
                f,
                "chunk {} is {} tokens, over the {} token limit",
                chunk_id, estimated_tokens, max_tokens
            ),
            Self::BudgetExceeded {
                dropped_chunks,
                dropped_tokens,
            } => write!(
                f,
                "token budget exhausted: {} chunks ({} tokens) not analyzed",
                dropped_chunks, dropped_tokens
            ),
            Self::Cancelled { undispatched } => {
                write!(f, "run cancelled with {} chunks undispatched", undispatched)
            }
        }
    }
}

/// A library detected in the source, aggregated over all its matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLibrary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub confidence: f64,
    pub should_filter: bool,
    pub informational: bool,
    pub matches: usize,
    pub bytes: usize,
}

/// Size and spend metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_bytes: usize,
    pub total_lines: usize,
    pub revision: String,
    pub chunks_total: usize,
    pub chunks_analyzed: usize,
    pub chunks_failed: usize,
    pub chunks_skipped: usize,
    /// Primary-range tokens of dispatched chunks
    pub tokens_spent: usize,
    /// Overlap tokens sent alongside, counted separately
    pub context_tokens_spent: usize,
    pub processing_ms: u64,
}

/// Summary counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_findings: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub libraries_detected: usize,
    /// Percentage of bytes covered by filtered library chunks
    pub code_reduction: f64,
    pub duplicates_removed: usize,
    pub overlap_suppressed: usize,
    pub skipped: BTreeMap<String, usize>,
}

/// The merged, final artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub analyzer: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: Metrics,
    pub summary: Summary,
    pub findings: Vec<Finding>,
    pub libraries: Vec<DetectedLibrary>,
    pub chunks: Vec<ChunkReport>,
    pub notes: Vec<RunNote>,
}

impl AnalysisResult {
    /// Whether any chunk failed or was skipped.
    pub fn is_partial(&self) -> bool {
        self.metrics.chunks_failed > 0 || self.metrics.chunks_skipped > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::parse("MODERATE"), Some(Severity::Medium));
        assert_eq!(Severity::parse("nope"), None);
    }

    #[test]
    fn test_run_note_serializes_tagged() {
        let note = RunNote::BudgetExceeded {
            dropped_chunks: 3,
            dropped_tokens: 900,
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["kind"], "budget-exceeded");
        assert_eq!(json["droppedChunks"], 3);
    }

    #[test]
    fn test_chunk_status_flattened_into_report() {
        let report = ChunkReport {
            id: "abc".into(),
            byte_range: ByteRange::new(0, 10),
            context_start: 0,
            kind: ChunkKind::Function,
            estimated_tokens: 3,
            oversized: false,
            importance: 0.5,
            status: ChunkStatus::Skipped {
                reason: SkipReason::BudgetExceeded,
            },
            attempts: 0,
            findings: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "budget-exceeded");
        assert_eq!(json["kind"], "function");
    }
}
