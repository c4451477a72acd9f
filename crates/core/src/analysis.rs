//! Analysis configuration.
//!
//! One explicit struct is threaded into every pipeline component: the scanner,
//! library filter, chunk builder, scorer, orchestrator and merger each read the
//! section they need. Nothing in the pipeline consults process-wide state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Complete configuration for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    pub chunking: ChunkingConfig,
    pub library: LibraryConfig,
    pub scoring: ScoringConfig,
    pub orchestrator: OrchestratorConfig,
    pub merge: MergeConfig,

    /// External rule table (security patterns and library signatures)
    pub rules_file: Option<PathBuf>,
}

/// Chunk sizing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkingConfig {
    /// Hard ceiling on estimated tokens per chunk (primary + overlap)
    pub max_tokens: usize,

    /// Trailing context carried into the next chunk
    pub overlap_tokens: usize,

    /// Keep function and class bodies whole even when oversized
    pub preserve_functions: bool,

    /// Keep wrapper scopes (IIFEs, module wrappers) whole even when oversized
    pub preserve_scopes: bool,

    /// Sub-split oversized function bodies at statement level
    pub force_split_oversized: bool,

    /// Characters per estimated token
    pub chars_per_token: usize,

    /// Identifiers shorter than this are ignored for dependency edges
    pub min_identifier_len: usize,

    /// Deepest nesting level the builder descends into
    pub max_scope_depth: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            overlap_tokens: 200,
            preserve_functions: true,
            preserve_scopes: false,
            force_split_oversized: false,
            chars_per_token: 4,
            min_identifier_len: 3,
            max_scope_depth: 8,
        }
    }
}

impl ChunkingConfig {
    /// Estimated token count for a byte length, rounded up.
    pub fn estimate_tokens(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.chars_per_token.max(1))
    }

    /// Byte length covered by a token count.
    pub fn tokens_to_bytes(&self, tokens: usize) -> usize {
        tokens.saturating_mul(self.chars_per_token)
    }
}

/// Library/bundler fingerprint matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    /// Matches below this confidence are informational only
    pub min_confidence: f64,

    /// Bytes searched on each side of a match for a version string
    pub version_window: usize,

    /// Largest gap between hits of one signature that still joins them into one region
    pub cluster_gap: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            version_window: 2048,
            cluster_gap: 2048,
        }
    }
}

/// Analysis focus; selects the default scoring weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Focus {
    #[default]
    Security,
    General,
}

impl Focus {
    /// Parse a focus name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "security" => Some(Self::Security),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Default weights for this focus.
    pub fn weights(&self) -> FocusWeights {
        match self {
            Self::Security => FocusWeights {
                pattern_density: 0.7,
                library_penalty: 0.8,
                connectivity: 0.1,
                base: 0.1,
            },
            Self::General => FocusWeights {
                pattern_density: 0.35,
                library_penalty: 0.8,
                connectivity: 0.4,
                base: 0.15,
            },
        }
    }
}

/// Importance score weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusWeights {
    /// Weight of security-pattern hit density
    pub pattern_density: f64,

    /// Multiplicative penalty scale for filtered library overlap
    pub library_penalty: f64,

    /// Weight of outgoing dependency edges
    pub connectivity: f64,

    /// Floor every chunk starts from
    pub base: f64,
}

/// Importance scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    pub focus: Focus,

    /// Explicit weights; overrides the focus defaults when set
    pub weights: Option<FocusWeights>,
}

impl ScoringConfig {
    /// Effective weights after applying any override.
    pub fn effective_weights(&self) -> FocusWeights {
        self.weights.unwrap_or_else(|| self.focus.weights())
    }
}

/// Exponential backoff for transient analyzer failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (1-based), capped at `max_ms`.
    pub fn delay_ms(&self, retry: u32) -> u64 {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_ms as f64 * self.multiplier.powi(exponent);
        if delay.is_finite() {
            (delay as u64).min(self.max_ms)
        } else {
            self.max_ms
        }
    }
}

/// Dispatch policy for analyzer calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Maximum in-flight analyzer calls
    pub concurrency: usize,

    /// Hard ceiling on estimated tokens dispatched in one run
    pub max_total_tokens: usize,

    /// Retries after the first attempt for transient failures
    pub retries: u32,

    pub backoff: BackoffConfig,

    /// Do not dispatch chunks dominated by a filtered library
    pub skip_library_chunks: bool,

    /// Do not dispatch chunks scoring below this importance
    pub min_importance: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_total_tokens: 200_000,
            retries: 3,
            backoff: BackoffConfig::default(),
            skip_library_chunks: true,
            min_importance: 0.0,
        }
    }
}

/// Finding deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeConfig {
    /// Findings closer than this many bytes may be duplicates
    pub dedup_window_bytes: usize,

    /// Minimum description word-set similarity for duplicates
    pub similarity_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            dedup_window_bytes: 64,
            similarity_threshold: 0.6,
        }
    }
}

impl AnalysisConfig {
    /// Reject configurations that cannot produce a valid run.
    ///
    /// Called before any processing begins.
    pub fn validate(&self) -> AppResult<()> {
        let chunking = &self.chunking;
        if chunking.max_tokens == 0 {
            return Err(AppError::Config("maxTokens must be greater than 0".into()));
        }
        if chunking.overlap_tokens >= chunking.max_tokens {
            return Err(AppError::Config(format!(
                "overlapTokens ({}) must be less than maxTokens ({})",
                chunking.overlap_tokens, chunking.max_tokens
            )));
        }
        if chunking.chars_per_token == 0 {
            return Err(AppError::Config("charsPerToken must be greater than 0".into()));
        }

        check_unit("library.minConfidence", self.library.min_confidence)?;
        check_unit("merge.similarityThreshold", self.merge.similarity_threshold)?;
        check_unit("orchestrator.minImportance", self.orchestrator.min_importance)?;

        if self.orchestrator.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".into()));
        }
        let backoff = &self.orchestrator.backoff;
        if !(backoff.multiplier >= 1.0) {
            return Err(AppError::Config(format!(
                "backoff.multiplier must be >= 1.0, got {}",
                backoff.multiplier
            )));
        }
        if backoff.max_ms < backoff.initial_ms {
            return Err(AppError::Config(
                "backoff.maxMs must not be less than backoff.initialMs".into(),
            ));
        }

        let w = self.scoring.effective_weights();
        for (name, value) in [
            ("patternDensity", w.pattern_density),
            ("libraryPenalty", w.library_penalty),
            ("connectivity", w.connectivity),
            ("base", w.base),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config(format!(
                    "scoring weight {} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> AppResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}
