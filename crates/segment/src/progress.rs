//! Structured progress reporting for analysis runs.
//!
//! Each pipeline phase emits events through an optional callback so a CLI can
//! show incremental feedback on multi-megabyte inputs.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Filter,
    Chunk,
    Score,
    Analyze,
    Merge,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scan => "scan",
            Phase::Filter => "filter",
            Phase::Chunk => "chunk",
            Phase::Score => "score",
            Phase::Analyze => "analyze",
            Phase::Merge => "merge",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event emitted during a run.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,

    /// Work done so far (bytes scanned, chunks analyzed, ...)
    pub current: u64,

    /// Total expected work, if known
    pub total: Option<u64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: f64,
}

impl ProgressEvent {
    /// Percentage complete, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        self.total.map(|t| {
            if t > 0 {
                (self.current as f64 / t as f64) * 100.0
            } else {
                100.0
            }
        })
    }

    /// Format as a single user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };
        let pct = self
            .percentage()
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();
        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emits progress events through a callback; cheap to clone into tasks.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Instant::now(),
        }
    }

    /// Reporter that emits nothing.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Instant::now(),
        }
    }

    pub fn emit(&self, phase: Phase, current: u64, total: Option<u64>, message: impl Into<String>) {
        let Some(callback) = &self.callback else {
            return;
        };
        let event = ProgressEvent {
            phase,
            current,
            total,
            message: message.into(),
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        };

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            message = %event.message,
            elapsed_secs = event.elapsed_secs,
            "Progress event"
        );
        callback(event);
    }

    pub fn scan(&self, bytes: u64, safe_splits: usize) {
        self.emit(
            Phase::Scan,
            bytes,
            Some(bytes),
            format!("{} safe boundaries", safe_splits),
        );
    }

    pub fn filter(&self, matches: usize, libraries: usize) {
        self.emit(
            Phase::Filter,
            matches as u64,
            None,
            format!("{} library regions, {} libraries", matches, libraries),
        );
    }

    pub fn chunk(&self, chunks: usize, oversized: usize) {
        self.emit(
            Phase::Chunk,
            chunks as u64,
            None,
            format!("{} chunks ({} oversized)", chunks, oversized),
        );
    }

    pub fn score(&self, scored: usize) {
        self.emit(Phase::Score, scored as u64, Some(scored as u64), "importance assigned");
    }

    pub fn analyze(&self, done: usize, total: usize, chunk_id: &str) {
        self.emit(
            Phase::Analyze,
            done as u64,
            Some(total as u64),
            format!("chunk {}", chunk_id),
        );
    }

    pub fn merge(&self, findings: usize) {
        self.emit(
            Phase::Merge,
            findings as u64,
            None,
            format!("{} findings", findings),
        );
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .finish()
    }
}
