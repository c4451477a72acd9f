//! Analysis orchestration.
//!
//! Chunks are offered to the analyzer in descending importance through a
//! bounded pool of in-flight calls. The only state shared between calls is the
//! token counter, which is reserved with a compare-and-swap before each
//! dispatch so concurrent dispatch can never overrun the run budget.
//! Cancellation is cooperative: it is observed before each dispatch and
//! between retries, and in-flight calls finish on their own.

use crate::analyzer::{AnalyzerError, AnalyzerErrorKind, ChunkAnalyzer, ChunkFinding, ChunkRequest};
use crate::chunk::Chunk;
use crate::progress::ProgressReporter;
use crate::source::SourceBuffer;
use crate::types::{RunNote, SkipReason};
use bundlescope_core::{BackoffConfig, OrchestratorConfig};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Result of analyzing one dispatched chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub findings: Vec<ChunkFinding>,
    pub succeeded: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<AnalyzerErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AnalysisOutcome {
    fn success(chunk: &Chunk, attempts: u32, findings: Vec<ChunkFinding>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            findings,
            succeeded: true,
            attempts,
            error_kind: None,
            error_message: None,
        }
    }

    fn failure(chunk: &Chunk, attempts: u32, error: &AnalyzerError) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            findings: Vec::new(),
            succeeded: false,
            attempts,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
        }
    }
}

/// A chunk that was never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub reason: SkipReason,
    pub estimated_tokens: usize,
}

impl SkippedChunk {
    fn new(chunk: &Chunk, reason: SkipReason) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            reason,
            estimated_tokens: chunk.estimated_tokens,
        }
    }
}

/// Everything the orchestrator hands to the merger.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One outcome per dispatched chunk, in source order
    pub outcomes: Vec<AnalysisOutcome>,
    /// Undispatched chunks, in source order
    pub skipped: Vec<SkippedChunk>,
    /// Primary tokens of dispatched chunks
    pub tokens_spent: usize,
    /// Overlap context tokens of dispatched chunks
    pub context_tokens_spent: usize,
    pub notes: Vec<RunNote>,
}

impl RunReport {
    pub fn dispatched(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }
}

enum Dispatch {
    Done(AnalysisOutcome, usize, usize),
    Skipped(SkippedChunk),
}

/// Drives analyzer calls for one run.
pub struct Orchestrator<'a> {
    config: &'a OrchestratorConfig,
    analyzer: Arc<dyn ChunkAnalyzer>,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a OrchestratorConfig, analyzer: Arc<dyn ChunkAnalyzer>) -> Self {
        Self {
            config,
            analyzer,
            cancel: CancellationToken::new(),
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Chunks in dispatch order: importance descending, then source order.
    pub fn dispatch_order(chunks: &[Chunk]) -> Vec<&Chunk> {
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.byte_range.start.cmp(&b.byte_range.start))
        });
        ordered
    }

    /// Analyze `chunks`, never failing as a whole.
    ///
    /// Every dispatched chunk yields an outcome; every other chunk is recorded
    /// as skipped with its reason.
    pub async fn run(&self, buffer: &SourceBuffer, chunks: &[Chunk]) -> RunReport {
        let mut report = RunReport::default();
        let mut candidates = Vec::new();

        for chunk in Self::dispatch_order(chunks) {
            if self.config.skip_library_chunks && chunk.is_library() {
                report
                    .skipped
                    .push(SkippedChunk::new(chunk, SkipReason::LibraryFiltered));
            } else if chunk.importance < self.config.min_importance {
                report
                    .skipped
                    .push(SkippedChunk::new(chunk, SkipReason::LowImportance));
            } else {
                candidates.push(chunk);
            }
        }

        let total = candidates.len();
        let spent = AtomicUsize::new(0);
        tracing::info!(
            "Dispatching up to {} chunks (concurrency {}, budget {} tokens)",
            total,
            self.config.concurrency,
            self.config.max_total_tokens
        );

        let mut dispatches = stream::iter(candidates)
            .map(|chunk| self.dispatch(buffer, chunk, &spent))
            .buffer_unordered(self.config.concurrency.max(1));

        let mut done = 0;
        while let Some(dispatch) = dispatches.next().await {
            match dispatch {
                Dispatch::Done(outcome, primary, context) => {
                    done += 1;
                    self.progress.analyze(done, total, &outcome.chunk_id);
                    report.tokens_spent += primary;
                    report.context_tokens_spent += context;
                    report.outcomes.push(outcome);
                }
                Dispatch::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        report.outcomes.sort_by_key(|o| o.chunk_index);
        report.skipped.sort_by_key(|s| s.chunk_index);

        let over_budget: Vec<&SkippedChunk> = report
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::BudgetExceeded)
            .collect();
        if !over_budget.is_empty() {
            let dropped_tokens = over_budget.iter().map(|s| s.estimated_tokens).sum();
            tracing::warn!(
                "Token budget exhausted: {} chunks ({} tokens) dropped",
                over_budget.len(),
                dropped_tokens
            );
            report.notes.push(RunNote::BudgetExceeded {
                dropped_chunks: over_budget.len(),
                dropped_tokens,
            });
        }

        let undispatched = report
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::Cancelled)
            .count();
        if undispatched > 0 {
            report.notes.push(RunNote::Cancelled { undispatched });
        }

        tracing::info!(
            "Analysis finished: {} dispatched, {} failed, {} skipped, {} tokens",
            report.dispatched(),
            report.failed(),
            report.skipped.len(),
            report.tokens_spent + report.context_tokens_spent
        );
        report
    }

    async fn dispatch(&self, buffer: &SourceBuffer, chunk: &Chunk, spent: &AtomicUsize) -> Dispatch {
        if self.cancel.is_cancelled() {
            return Dispatch::Skipped(SkippedChunk::new(chunk, SkipReason::Cancelled));
        }
        if !reserve(spent, chunk.estimated_tokens, self.config.max_total_tokens) {
            tracing::debug!(
                "Chunk {} ({} tokens) does not fit the remaining budget",
                chunk.id,
                chunk.estimated_tokens
            );
            return Dispatch::Skipped(SkippedChunk::new(chunk, SkipReason::BudgetExceeded));
        }

        let outcome = self.analyze_chunk(buffer, chunk).await;
        Dispatch::Done(outcome, chunk.primary_tokens, chunk.context_tokens)
    }

    #[instrument(skip_all, fields(chunk = %chunk.id, tokens = chunk.estimated_tokens))]
    async fn analyze_chunk(&self, buffer: &SourceBuffer, chunk: &Chunk) -> AnalysisOutcome {
        let range = chunk.analysis_range();
        let request = ChunkRequest {
            chunk,
            text: buffer.slice(range),
            text_offset: range.start,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.analyzer.analyze(&request).await {
                Ok(findings) => {
                    tracing::debug!("Chunk analyzed: {} findings", findings.len());
                    return AnalysisOutcome::success(chunk, attempts, findings);
                }
                Err(error) => error,
            };

            if !error.is_transient() || attempts > self.config.retries {
                tracing::warn!("Chunk failed after {} attempts: {}", attempts, error);
                return AnalysisOutcome::failure(chunk, attempts, &error);
            }

            let delay = retry_delay(&self.config.backoff, attempts, error.retry_after());
            tracing::warn!(
                "Transient failure ({}), retrying in {:?} (attempt {}/{})",
                error,
                delay,
                attempts + 1,
                self.config.retries + 1
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Cancelled during backoff");
                    return AnalysisOutcome::failure(chunk, attempts, &error);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Backoff before the next attempt. A provider's `Retry-After` raises the
/// delay but never past `backoff.max_ms`.
fn retry_delay(backoff: &BackoffConfig, attempts: u32, retry_after: Option<Duration>) -> Duration {
    let delay = Duration::from_millis(backoff.delay_ms(attempts));
    match retry_after {
        Some(after) => delay.max(after.min(Duration::from_millis(backoff.max_ms))),
        None => delay,
    }
}

/// Atomically add `cost` to `spent` if the total stays within `limit`.
fn reserve(spent: &AtomicUsize, cost: usize, limit: usize) -> bool {
    spent
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            current.checked_add(cost).filter(|next| *next <= limit)
        })
        .is_ok()
}
