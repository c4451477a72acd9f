//! Result merging.
//!
//! Turns unordered per-chunk outcomes into one `AnalysisResult`: locations are
//! made absolute, findings reported from overlap context are suppressed when
//! the owning chunk was analyzed, near-duplicates are collapsed and the output
//! is put in a fixed order. Nothing here depends on completion order or the
//! clock; timing values come in through `MergeContext`.

use crate::analyzer::{AnalyzerErrorKind, ChunkFinding};
use crate::chunk::Chunk;
use crate::library::{detected_libraries, LibraryMatch};
use crate::orchestrator::{Orchestrator, RunReport};
use crate::source::SourceBuffer;
use crate::types::{
    AnalysisResult, ChunkReport, ChunkStatus, DetectedLibrary, Finding, Metrics, RunNote,
    Severity, SkipReason, Summary,
};
use bundlescope_core::MergeConfig;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Run-level values the merger records but does not compute.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub analyzer: String,
    pub processing_ms: u64,
    pub generated_at: DateTime<Utc>,
}

/// A finding resolved to an absolute offset, before deduplication.
#[derive(Debug)]
struct Candidate<'a> {
    finding: &'a ChunkFinding,
    chunk: &'a Chunk,
    offset: usize,
    /// Position of the producing chunk in dispatch order
    rank: usize,
    /// Position among all findings, in source order of chunks
    sequence: usize,
}

/// Merge a run into the final result.
///
/// `notes` are the planning notes (scanner and builder); the run's own notes
/// are appended after them.
pub fn merge(
    mut run: RunReport,
    chunks: &[Chunk],
    buffer: &SourceBuffer,
    libraries: &[LibraryMatch],
    notes: Vec<RunNote>,
    context: MergeContext,
    config: &MergeConfig,
) -> AnalysisResult {
    run.outcomes.sort_by_key(|o| o.chunk_index);
    let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
    let rank: HashMap<&str, usize> = Orchestrator::dispatch_order(chunks)
        .into_iter()
        .enumerate()
        .map(|(rank, chunk)| (chunk.id.as_str(), rank))
        .collect();
    let succeeded: BTreeSet<&str> = run
        .outcomes
        .iter()
        .filter(|o| o.succeeded)
        .map(|o| o.chunk_id.as_str())
        .collect();

    let mut overlap_suppressed = 0;
    let mut candidates = Vec::new();
    for outcome in &run.outcomes {
        let Some(chunk) = by_id.get(outcome.chunk_id.as_str()).copied() else {
            tracing::warn!("Outcome for unknown chunk {} ignored", outcome.chunk_id);
            continue;
        };
        for finding in &outcome.findings {
            let offset = absolute_offset(finding, chunk, buffer);
            if offset < chunk.byte_range.start && owner_succeeded(chunks, offset, &succeeded) {
                overlap_suppressed += 1;
                continue;
            }
            candidates.push(Candidate {
                finding,
                chunk,
                offset,
                rank: rank.get(chunk.id.as_str()).copied().unwrap_or(usize::MAX),
                sequence: candidates.len(),
            });
        }
    }

    let reported = candidates.len();
    let kept = deduplicate(candidates, config);
    let duplicates_removed = reported - kept.len();

    let mut findings: Vec<Finding> = kept
        .into_iter()
        .map(|c| Finding {
            category: c.finding.category.clone(),
            severity: c.finding.severity,
            confidence: c.finding.confidence,
            location: buffer.location(c.offset),
            description: c.finding.description.clone(),
            recommendation: c.finding.recommendation.clone(),
            chunk_id: c.chunk.id.clone(),
        })
        .collect();
    findings.sort_by(compare_findings);

    let chunk_reports = chunk_reports(chunks, &run, &findings);
    let detected = detected_libraries(libraries);
    let summary = summarize(
        chunks,
        buffer,
        &run,
        &findings,
        &detected,
        duplicates_removed,
        overlap_suppressed,
    );

    tracing::info!(
        "Merged {} findings ({} duplicates, {} from overlap context removed)",
        findings.len(),
        duplicates_removed,
        overlap_suppressed
    );

    let metrics = Metrics {
        total_bytes: buffer.len(),
        total_lines: buffer.line_count(),
        revision: buffer.revision().to_string(),
        chunks_total: chunks.len(),
        chunks_analyzed: run.outcomes.len() - run.failed(),
        chunks_failed: run.failed(),
        chunks_skipped: run.skipped.len(),
        tokens_spent: run.tokens_spent,
        context_tokens_spent: run.context_tokens_spent,
        processing_ms: context.processing_ms,
    };

    let mut all_notes = notes;
    all_notes.extend(run.notes);

    AnalysisResult {
        analyzer: context.analyzer,
        generated_at: context.generated_at,
        metrics,
        summary,
        findings,
        libraries: detected,
        chunks: chunk_reports,
        notes: all_notes,
    }
}

/// Resolve a chunk-relative finding to an absolute offset inside the chunk's
/// analysis range.
fn absolute_offset(finding: &ChunkFinding, chunk: &Chunk, buffer: &SourceBuffer) -> usize {
    let range = chunk.analysis_range();
    let relative = match (finding.offset, finding.line) {
        (Some(offset), _) => offset,
        (None, Some(line)) => line_start(buffer.slice(range), line).unwrap_or(0),
        (None, None) => chunk.byte_range.start - range.start,
    };
    let last = range.end.saturating_sub(1).max(range.start);
    buffer.floor_char_boundary(range.start.saturating_add(relative).min(last))
}

/// Offset of 1-based `line` within `text`.
fn line_start(text: &str, line: usize) -> Option<usize> {
    if line <= 1 {
        return Some(0);
    }
    text.match_indices('\n').nth(line - 2).map(|(i, _)| i + 1)
}

fn owner_succeeded(chunks: &[Chunk], offset: usize, succeeded: &BTreeSet<&str>) -> bool {
    let idx = chunks.partition_point(|c| c.byte_range.end <= offset);
    chunks
        .get(idx)
        .filter(|c| c.byte_range.contains(offset))
        .is_some_and(|c| succeeded.contains(c.id.as_str()))
}

/// Collapse near-duplicates, keeping the most confident instance.
///
/// Candidates are visited best-first (confidence, then dispatch rank, then
/// sequence), so the survivor of any duplicate group is the same on every run.
fn deduplicate<'a>(mut candidates: Vec<Candidate<'a>>, config: &MergeConfig) -> Vec<Candidate<'a>> {
    candidates.sort_by(|a, b| {
        b.finding
            .confidence
            .total_cmp(&a.finding.confidence)
            .then_with(|| a.rank.cmp(&b.rank))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });

    let mut kept: Vec<Candidate<'a>> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<&str, BTreeMap<usize, Vec<usize>>> = HashMap::new();

    for candidate in candidates {
        let by_offset = index.entry(candidate.finding.category.as_str()).or_default();
        let low = candidate.offset.saturating_sub(config.dedup_window_bytes);
        let high = candidate.offset.saturating_add(config.dedup_window_bytes);
        let duplicate = by_offset
            .range(low..=high)
            .flat_map(|(_, ids)| ids.iter())
            .any(|&i| {
                similarity(&kept[i].finding.description, &candidate.finding.description)
                    >= config.similarity_threshold
            });
        if duplicate {
            tracing::trace!(
                "Dropping duplicate {} finding at {}",
                candidate.finding.category,
                candidate.offset
            );
            continue;
        }
        by_offset.entry(candidate.offset).or_default().push(kept.len());
        kept.push(candidate);
    }
    kept
}

/// Jaccard similarity of the lowercase word sets of two descriptions.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> BTreeSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    let (a, b) = (words(a), words(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    shared as f64 / (a.len() + b.len() - shared) as f64
}

fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.location.offset.cmp(&b.location.offset))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn chunk_reports(chunks: &[Chunk], run: &RunReport, findings: &[Finding]) -> Vec<ChunkReport> {
    let outcomes: HashMap<&str, _> = run.outcomes.iter().map(|o| (o.chunk_id.as_str(), o)).collect();
    let skipped: HashMap<&str, SkipReason> = run
        .skipped
        .iter()
        .map(|s| (s.chunk_id.as_str(), s.reason))
        .collect();
    let mut per_chunk: HashMap<&str, usize> = HashMap::new();
    for finding in findings {
        *per_chunk.entry(finding.chunk_id.as_str()).or_default() += 1;
    }

    chunks
        .iter()
        .map(|chunk| {
            let id = chunk.id.as_str();
            let (status, attempts) = match outcomes.get(id) {
                Some(o) if o.succeeded => (ChunkStatus::Analyzed, o.attempts),
                Some(o) => (
                    ChunkStatus::Failed {
                        error_kind: o.error_kind.unwrap_or(AnalyzerErrorKind::Rejected),
                        message: o.error_message.clone().unwrap_or_default(),
                    },
                    o.attempts,
                ),
                None => (
                    ChunkStatus::Skipped {
                        reason: skipped.get(id).copied().unwrap_or(SkipReason::Cancelled),
                    },
                    0,
                ),
            };
            ChunkReport {
                id: chunk.id.clone(),
                byte_range: chunk.byte_range,
                context_start: chunk.context_start,
                kind: chunk.kind,
                estimated_tokens: chunk.estimated_tokens,
                oversized: chunk.oversized,
                importance: chunk.importance,
                status,
                attempts,
                findings: per_chunk.get(id).copied().unwrap_or(0),
            }
        })
        .collect()
}

fn summarize(
    chunks: &[Chunk],
    buffer: &SourceBuffer,
    run: &RunReport,
    findings: &[Finding],
    detected: &[DetectedLibrary],
    duplicates_removed: usize,
    overlap_suppressed: usize,
) -> Summary {
    let mut by_severity: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for finding in findings {
        *by_severity.entry(finding.severity).or_default() += 1;
    }

    let mut skipped: BTreeMap<String, usize> = BTreeMap::new();
    for s in &run.skipped {
        *skipped.entry(s.reason.to_string()).or_default() += 1;
    }

    // Only library chunks that were actually left out count as filtered.
    let filtered: BTreeSet<usize> = run
        .skipped
        .iter()
        .filter(|s| s.reason == SkipReason::LibraryFiltered)
        .map(|s| s.chunk_index)
        .collect();
    let filtered_bytes: usize = chunks
        .iter()
        .filter(|c| filtered.contains(&c.index))
        .map(|c| c.byte_range.len())
        .sum();

    Summary {
        total_findings: findings.len(),
        by_severity,
        libraries_detected: detected.iter().filter(|l| !l.informational).count(),
        code_reduction: percentage(filtered_bytes, buffer.len()),
        duplicates_removed,
        overlap_suppressed,
        skipped,
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}
