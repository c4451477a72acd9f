//! Importance scoring.
//!
//! importance = (density * w.pattern_density + connectivity * w.connectivity + w.base)
//!            * (1 - w.library_penalty * library_cover), clamped to [0, 1]
//!
//! where `density` saturates weighted security-pattern hits per KiB,
//! `connectivity` saturates outgoing dependency edges and `library_cover` is
//! the confidence-weighted share of the chunk covered by filtering library
//! matches. Only the primary range is scored, so overlap context never counts
//! twice. The scorer is pure: identical inputs give identical scores.

use crate::chunk::Chunk;
use crate::library::LibraryMatch;
use crate::rules::SecurityMatcher;
use crate::source::SourceBuffer;
use bundlescope_core::FocusWeights;
use serde::Serialize;

/// Dependency count at which connectivity reaches one half.
const CONNECTIVITY_HALF: f64 = 2.0;

/// Components of a chunk's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub weighted_hits: f64,
    pub density: f64,
    pub connectivity: f64,
    pub library_cover: f64,
    pub importance: f64,
}

pub struct Scorer<'a> {
    buffer: &'a SourceBuffer,
    security: &'a SecurityMatcher,
    libraries: &'a [LibraryMatch],
    weights: FocusWeights,
}

impl<'a> Scorer<'a> {
    pub fn new(
        buffer: &'a SourceBuffer,
        security: &'a SecurityMatcher,
        libraries: &'a [LibraryMatch],
        weights: FocusWeights,
    ) -> Self {
        Self {
            buffer,
            security,
            libraries,
            weights,
        }
    }

    pub fn score(&self, chunk: &Chunk) -> f64 {
        self.breakdown(chunk).importance
    }

    pub fn breakdown(&self, chunk: &Chunk) -> ScoreBreakdown {
        let range = chunk.byte_range;
        let weighted_hits = if range.is_empty() {
            0.0
        } else {
            self.security.weighted_hits(self.buffer.slice(range))
        };

        let kib = (range.len().max(1) as f64) / 1024.0;
        let per_kib = weighted_hits / kib;
        let density = per_kib / (per_kib + 1.0);

        let edges = chunk.dependencies.len() as f64;
        let connectivity = edges / (edges + CONNECTIVITY_HALF);

        let library_cover = self.library_cover(chunk);

        let w = &self.weights;
        let raw = (w.pattern_density * density + w.connectivity * connectivity + w.base)
            * (1.0 - w.library_penalty * library_cover);
        let importance = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

        ScoreBreakdown {
            weighted_hits,
            density,
            connectivity,
            library_cover,
            importance,
        }
    }

    /// Score every chunk in place.
    pub fn score_all(&self, chunks: &mut [Chunk]) {
        for chunk in chunks.iter_mut() {
            chunk.importance = self.score(chunk);
        }
        tracing::debug!("Scored {} chunks", chunks.len());
    }

    fn library_cover(&self, chunk: &Chunk) -> f64 {
        let range = chunk.byte_range;
        if range.is_empty() {
            return 0.0;
        }
        let first = self
            .libraries
            .partition_point(|m| m.byte_range.end <= range.start);
        let weighted: f64 = self.libraries[first..]
            .iter()
            .take_while(|m| m.byte_range.start < range.end)
            .filter(|m| m.should_filter)
            .map(|m| m.confidence * m.byte_range.intersection_len(&range) as f64)
            .sum();
        (weighted / range.len() as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;
    use crate::rules::SecurityPattern;
    use crate::source::ByteRange;
    use crate::types::Severity;
    use bundlescope_core::Focus;
    use std::collections::BTreeSet;

    fn eval_matcher() -> SecurityMatcher {
        SecurityMatcher::new(&[SecurityPattern {
            name: "eval".into(),
            category: "code-injection".into(),
            pattern: r"\beval\s*\(".into(),
            severity: Severity::High,
            weight: 1.0,
            confidence: 0.6,
            description: "eval".into(),
            recommendation: None,
        }])
        .unwrap()
    }

    fn chunk(start: usize, end: usize) -> Chunk {
        Chunk {
            id: format!("{}-{}", start, end),
            index: 0,
            byte_range: ByteRange::new(start, end),
            context_start: start,
            primary_tokens: 0,
            context_tokens: 0,
            estimated_tokens: 0,
            kind: ChunkKind::Unknown,
            oversized: false,
            importance: 0.0,
            dependencies: BTreeSet::new(),
            library: None,
        }
    }

    #[test]
    fn test_pattern_hits_raise_importance() {
        let buffer = SourceBuffer::new("function a(){eval(x)}function b(){return 1}");
        let matcher = eval_matcher();
        let scorer = Scorer::new(&buffer, &matcher, &[], Focus::Security.weights());
        let first = scorer.score(&chunk(0, 21));
        let second = scorer.score(&chunk(21, buffer.len()));
        assert!(first > second);
        assert!((second - 0.1).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&first));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let buffer = SourceBuffer::new("eval(a);eval(b);var c=1;");
        let matcher = eval_matcher();
        let scorer = Scorer::new(&buffer, &matcher, &[], Focus::General.weights());
        let c = chunk(0, buffer.len());
        assert_eq!(scorer.breakdown(&c), scorer.breakdown(&c));
    }

    #[test]
    fn test_library_overlap_penalizes() {
        let buffer = SourceBuffer::new("eval(a);var lib=1;");
        let matcher = eval_matcher();
        let libraries = vec![LibraryMatch {
            name: "lib".into(),
            version: None,
            confidence: 1.0,
            byte_range: ByteRange::new(0, buffer.len()),
            should_filter: true,
            informational: false,
            signature_index: 0,
        }];
        let weights = Focus::Security.weights();
        let plain = Scorer::new(&buffer, &matcher, &[], weights).score(&chunk(0, buffer.len()));
        let filtered =
            Scorer::new(&buffer, &matcher, &libraries, weights).score(&chunk(0, buffer.len()));
        assert!(filtered < plain);
        assert!((filtered - plain * 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_connectivity_bonus() {
        let buffer = SourceBuffer::new("var a=b+c;");
        let matcher = eval_matcher();
        let scorer = Scorer::new(&buffer, &matcher, &[], Focus::General.weights());
        let lonely = chunk(0, buffer.len());
        let mut connected = lonely.clone();
        connected.dependencies.insert("x".into());
        connected.dependencies.insert("y".into());
        assert!(scorer.score(&connected) > scorer.score(&lonely));
        assert!((scorer.breakdown(&connected).connectivity - 0.5).abs() < 1e-9);
    }
}
