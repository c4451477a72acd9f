//! Segmentation and token-budgeted analysis of large minified JavaScript.
//!
//! Data flows strictly forward:
//! source → scanner → library filter → chunk builder → scorer → orchestrator
//! → merger → `AnalysisResult`.
//!
//! Everything up to the scorer is synchronous and pure; `plan` runs those
//! stages. `analyze_source` adds the orchestrator, the only stage that calls
//! out to an analyzer, and the merger.

pub mod analyzer;
pub mod chunk;
pub mod library;
pub mod merger;
pub mod orchestrator;
pub mod progress;
pub mod rules;
pub mod scanner;
pub mod scorer;
pub mod source;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use analyzer::{
    AnalyzerError, AnalyzerErrorKind, ChunkAnalyzer, ChunkFinding, ChunkRequest,
    HeuristicAnalyzer, LlmAnalyzer, LlmAnalyzerOptions,
};
pub use chunk::{Chunk, ChunkKind};
pub use library::{LibraryMatch, LibrarySignature, SignaturePattern};
pub use merger::MergeContext;
pub use orchestrator::{AnalysisOutcome, Orchestrator, RunReport};
pub use progress::{Phase, ProgressCallback, ProgressEvent, ProgressReporter};
pub use rules::{CompiledRules, RuleSet, SecurityPattern};
pub use source::{ByteRange, Location, SourceBuffer};
pub use types::{
    AnalysisResult, ChunkReport, ChunkStatus, DetectedLibrary, Finding, Metrics, RunNote,
    Severity, SkipReason, Summary,
};

use bundlescope_core::{AnalysisConfig, AppResult};
use chrono::Utc;
use chunk::ChunkBuilder;
use scanner::BoundaryScanner;
use scorer::Scorer;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Scored chunks for a buffer, ready for dispatch.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    /// In source order; primary ranges tile the buffer
    pub chunks: Vec<Chunk>,
    pub libraries: Vec<LibraryMatch>,
    /// Scanner and builder notes
    pub notes: Vec<RunNote>,
    pub safe_splits: usize,
}

impl SegmentPlan {
    pub fn estimated_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.estimated_tokens).sum()
    }

    pub fn oversized(&self) -> usize {
        self.chunks.iter().filter(|c| c.oversized).count()
    }
}

/// Scan, filter, chunk and score `buffer`.
///
/// Fails only on invalid configuration.
pub fn plan(
    buffer: &SourceBuffer,
    rules: &CompiledRules,
    config: &AnalysisConfig,
    progress: &ProgressReporter,
) -> AppResult<SegmentPlan> {
    config.validate()?;

    let scan = BoundaryScanner::new(buffer).collect_result();
    tracing::info!(
        "Scanned {} bytes: {} safe boundaries, {} unsafe",
        buffer.len(),
        scan.safe_splits.len(),
        scan.unsafe_marks
    );
    progress.scan(buffer.len() as u64, scan.safe_splits.len());

    let libraries = rules.libraries.find(buffer);
    let detected = library::detected_libraries(&libraries);
    tracing::info!(
        "Library filter: {} regions across {} libraries",
        libraries.len(),
        detected.len()
    );
    progress.filter(libraries.len(), detected.len());

    let built = ChunkBuilder::new(buffer, &config.chunking).build(&scan, &libraries);
    let mut chunks = built.chunks;

    let scorer = Scorer::new(
        buffer,
        &rules.security,
        &libraries,
        config.scoring.effective_weights(),
    );
    scorer.score_all(&mut chunks);

    let plan = SegmentPlan {
        chunks,
        libraries,
        notes: built.notes,
        safe_splits: scan.safe_splits.len(),
    };
    tracing::info!(
        "Planned {} chunks ({} oversized, ~{} tokens)",
        plan.chunks.len(),
        plan.oversized(),
        plan.estimated_tokens()
    );
    progress.chunk(plan.chunks.len(), plan.oversized());
    progress.score(plan.chunks.len());
    Ok(plan)
}

/// Run the whole pipeline over `buffer`.
///
/// Per-chunk failures, skips and cancellation are reported inside the result;
/// only configuration errors are returned as `Err`.
pub async fn analyze_source(
    buffer: &SourceBuffer,
    rules: &CompiledRules,
    config: &AnalysisConfig,
    analyzer: Arc<dyn ChunkAnalyzer>,
    cancel: &CancellationToken,
    progress: &ProgressReporter,
) -> AppResult<AnalysisResult> {
    let started = Instant::now();
    let plan = plan(buffer, rules, config, progress)?;

    let run = Orchestrator::new(&config.orchestrator, analyzer.clone())
        .with_cancellation(cancel.clone())
        .with_progress(progress.clone())
        .run(buffer, &plan.chunks)
        .await;

    let context = MergeContext {
        analyzer: analyzer.name().to_string(),
        processing_ms: started.elapsed().as_millis() as u64,
        generated_at: Utc::now(),
    };
    let result = merger::merge(
        run,
        &plan.chunks,
        buffer,
        &plan.libraries,
        plan.notes,
        context,
        &config.merge,
    );
    progress.merge(result.findings.len());
    Ok(result)
}
