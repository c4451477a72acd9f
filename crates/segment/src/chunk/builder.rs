//! Greedy chunk packing over scanner boundaries.

use super::classify::{classify, is_declaration};
use super::dependencies::{link_dependencies, IdentifierIndex};
use super::{chunk_id, Chunk, ChunkKind};
use crate::library::LibraryMatch;
use crate::scanner::{BoundaryScanner, ScanResult};
use crate::source::{ByteRange, SourceBuffer};
use crate::types::RunNote;
use bundlescope_core::ChunkingConfig;
use std::collections::{BTreeMap, BTreeSet};

/// Share of a chunk's primary bytes a filtering library must cover to own it.
const LIBRARY_DOMINANCE: f64 = 0.5;

/// Chunks plus the notes raised while building them.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub chunks: Vec<Chunk>,
    pub notes: Vec<RunNote>,
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    range: ByteRange,
    oversized: bool,
}

/// Packs safe-split segments into chunks that fit the token limit.
pub struct ChunkBuilder<'a> {
    buffer: &'a SourceBuffer,
    config: &'a ChunkingConfig,
}

impl<'a> ChunkBuilder<'a> {
    pub fn new(buffer: &'a SourceBuffer, config: &'a ChunkingConfig) -> Self {
        Self { buffer, config }
    }

    /// Build chunks from a top-level scan.
    ///
    /// Primary ranges tile `[0, len)`. Each chunk's `estimated_tokens`
    /// (primary plus overlap context) stays within `max_tokens` unless the chunk
    /// is flagged `oversized`.
    pub fn build(&self, scan: &ScanResult, libraries: &[LibraryMatch]) -> BuildOutput {
        let mut notes = Vec::new();
        if let Some(malformed) = scan.malformed {
            tracing::warn!(
                "No safe boundaries after offset {}: {}",
                malformed.offset,
                malformed.kind.describe()
            );
            notes.push(RunNote::MalformedInputBoundary {
                offset: malformed.offset,
                reason: malformed.kind.describe().to_string(),
            });
        }

        let mut pieces = Vec::new();
        self.pack(
            ByteRange::new(0, self.buffer.len()),
            &scan.safe_splits,
            0,
            &mut pieces,
        );

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut indexes = Vec::with_capacity(pieces.len());
        for (index, piece) in pieces.iter().enumerate() {
            let previous_start = index.checked_sub(1).map(|i| pieces[i].range.start);
            let chunk = self.make_chunk(index, *piece, previous_start, libraries);

            if chunk.oversized {
                notes.push(RunNote::OversizedUnsplittableChunk {
                    chunk_id: chunk.id.clone(),
                    estimated_tokens: chunk.estimated_tokens,
                    max_tokens: self.config.max_tokens,
                });
            }

            indexes.push(IdentifierIndex::from_text(
                self.buffer.slice(chunk.byte_range),
                self.config.min_identifier_len,
            ));
            chunks.push(chunk);
        }

        link_dependencies(&mut chunks, &indexes);

        tracing::info!(
            "Built {} chunks ({} oversized) from {} bytes",
            chunks.len(),
            chunks.iter().filter(|c| c.oversized).count(),
            self.buffer.len()
        );

        BuildOutput { chunks, notes }
    }

    fn tokens(&self, bytes: usize) -> usize {
        self.config.estimate_tokens(bytes)
    }

    fn primary_budget(&self) -> usize {
        self.config
            .max_tokens
            .saturating_sub(self.config.overlap_tokens)
            .max(1)
    }

    /// Greedily pack the segments of `range` delimited by `splits`.
    fn pack(&self, range: ByteRange, splits: &[usize], level: usize, out: &mut Vec<Piece>) {
        let budget = self.primary_budget();
        let mut points = Vec::with_capacity(splits.len() + 2);
        points.push(range.start);
        points.extend(
            splits
                .iter()
                .copied()
                .filter(|&s| s > range.start && s < range.end),
        );
        points.push(range.end);

        let mut cur_start = range.start;
        let mut cur_end = range.start;
        for pair in points.windows(2) {
            let (a_start, a_end) = (pair[0], pair[1]);
            if a_end <= a_start {
                continue;
            }

            if cur_end > cur_start {
                if self.tokens(a_end - cur_start) <= budget {
                    cur_end = a_end;
                    continue;
                }
                out.push(Piece {
                    range: ByteRange::new(cur_start, cur_end),
                    oversized: false,
                });
            }

            cur_start = a_start;
            cur_end = a_start;
            let atom_tokens = self.tokens(a_end - a_start);
            if atom_tokens <= budget {
                cur_end = a_end;
            } else if atom_tokens <= self.config.max_tokens {
                // Fits once the overlap context is shrunk.
                out.push(Piece {
                    range: ByteRange::new(a_start, a_end),
                    oversized: false,
                });
                cur_start = a_end;
                cur_end = a_end;
            } else {
                self.split_oversized(ByteRange::new(a_start, a_end), level, out);
                cur_start = a_end;
                cur_end = a_end;
            }
        }

        if cur_end > cur_start {
            out.push(Piece {
                range: ByteRange::new(cur_start, cur_end),
                oversized: false,
            });
        }
    }

    /// A single segment over the limit: descend into it or keep it whole.
    fn split_oversized(&self, range: ByteRange, level: usize, out: &mut Vec<Piece>) {
        let text = self.buffer.slice(range);
        let declaration = is_declaration(text);
        let descend = self.config.force_split_oversized
            || if declaration {
                !self.config.preserve_functions
            } else {
                !self.config.preserve_scopes
            };

        if descend {
            let remaining = self.config.max_scope_depth.saturating_sub(level);
            for relative in 1..=remaining {
                let scan = BoundaryScanner::over(self.buffer, range, relative).collect_result();
                if !scan.safe_splits.is_empty() {
                    tracing::debug!(
                        "Descending {} levels into {}..{} ({} boundaries)",
                        relative,
                        range.start,
                        range.end,
                        scan.safe_splits.len()
                    );
                    self.pack(range, &scan.safe_splits, level + relative, out);
                    return;
                }
            }
        }

        tracing::debug!(
            "Keeping oversized segment {}..{} whole (declaration: {})",
            range.start,
            range.end,
            declaration
        );
        out.push(Piece {
            range,
            oversized: true,
        });
    }

    fn make_chunk(
        &self,
        index: usize,
        piece: Piece,
        previous_start: Option<usize>,
        libraries: &[LibraryMatch],
    ) -> Chunk {
        let range = piece.range;
        let primary_tokens = self.tokens(range.len());

        let context_start = match previous_start {
            Some(previous) if !piece.oversized && self.config.overlap_tokens > 0 => {
                let room = self
                    .config
                    .max_tokens
                    .saturating_sub(primary_tokens)
                    .min(self.config.overlap_tokens);
                let bytes = self
                    .config
                    .tokens_to_bytes(room)
                    .min(range.start - previous);
                self.buffer.ceil_char_boundary(range.start - bytes)
            }
            _ => range.start,
        };
        let context_tokens = self.tokens(range.start - context_start);

        let library = dominant_library(range, libraries);
        let mut kind = classify(self.buffer.slice(range), library.as_deref());
        // An oversized piece is one construct; inner declarations don't make it a utility run.
        if piece.oversized && kind == ChunkKind::Utility {
            kind = ChunkKind::Function;
        }

        Chunk {
            id: chunk_id(range, self.buffer.revision()),
            index,
            byte_range: range,
            context_start,
            primary_tokens,
            context_tokens,
            estimated_tokens: primary_tokens + context_tokens,
            kind,
            oversized: piece.oversized,
            importance: 0.0,
            dependencies: BTreeSet::new(),
            library,
        }
    }
}

/// Filtering library covering at least half of `range`, if any.
fn dominant_library(range: ByteRange, libraries: &[LibraryMatch]) -> Option<String> {
    if range.is_empty() {
        return None;
    }
    let first = libraries.partition_point(|m| m.byte_range.end <= range.start);
    let mut covered: BTreeMap<&str, usize> = BTreeMap::new();
    for m in libraries[first..]
        .iter()
        .take_while(|m| m.byte_range.start < range.end)
        .filter(|m| m.should_filter)
    {
        *covered.entry(m.name.as_str()).or_default() += m.byte_range.intersection_len(&range);
    }

    covered
        .into_iter()
        .filter(|(_, bytes)| *bytes as f64 >= range.len() as f64 * LIBRARY_DOMINANCE)
        .max_by_key(|(_, bytes)| *bytes)
        .map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;

    fn chunking(max_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
            ..ChunkingConfig::default()
        }
    }

    fn build(src: &str, config: &ChunkingConfig) -> BuildOutput {
        let buffer = SourceBuffer::new(src);
        let scan = BoundaryScanner::new(&buffer).collect_result();
        ChunkBuilder::new(&buffer, config).build(&scan, &[])
    }

    fn ranges(output: &BuildOutput) -> Vec<(usize, usize)> {
        output
            .chunks
            .iter()
            .map(|c| (c.byte_range.start, c.byte_range.end))
            .collect()
    }

    #[test]
    fn test_two_functions_split_at_boundary() {
        let output = build(
            "function a(){eval(x)}function b(){return 1}",
            &chunking(3, 0),
        );
        assert_eq!(ranges(&output), vec![(0, 21), (21, 43)]);
        assert!(output.chunks.iter().all(|c| c.oversized));
        assert!(output.chunks.iter().all(|c| c.kind == ChunkKind::Function));
        assert_eq!(output.notes.len(), 2);
    }

    #[test]
    fn test_greedy_packing_with_overlap() {
        let src = "var a=1;".repeat(20);
        let output = build(&src, &chunking(10, 2));
        assert_eq!(
            ranges(&output),
            vec![(0, 32), (32, 64), (64, 96), (96, 128), (128, 160)]
        );
        assert_eq!(output.chunks[0].context_start, 0);
        assert_eq!(output.chunks[1].context_start, 24);
        for chunk in &output.chunks {
            assert!(chunk.estimated_tokens <= 10);
            assert!(chunk.context_tokens <= 2);
            assert!(!chunk.oversized);
        }
        assert!(output.notes.is_empty());
    }

    #[test]
    fn test_wrapper_scope_is_descended() {
        let src = "!function(){var a=1;var b=2;var c=3;var d=4;}();";
        let output = build(src, &chunking(6, 0));
        assert_eq!(ranges(&output), vec![(0, 20), (20, 44), (44, 48)]);
        assert!(output.chunks.iter().all(|c| !c.oversized));

        let preserved = ChunkingConfig {
            preserve_scopes: true,
            ..chunking(6, 0)
        };
        let output = build(src, &preserved);
        assert_eq!(ranges(&output), vec![(0, 48)]);
        assert!(output.chunks[0].oversized);
    }

    #[test]
    fn test_oversized_function_kept_unless_forced() {
        let src = "function big(){var a=1;var b=2;var c=3;}";
        let output = build(src, &chunking(6, 0));
        assert_eq!(ranges(&output), vec![(0, 40)]);
        assert!(output.chunks[0].oversized);
        assert!(matches!(
            output.notes[0],
            RunNote::OversizedUnsplittableChunk { max_tokens: 6, .. }
        ));

        let forced = ChunkingConfig {
            force_split_oversized: true,
            ..chunking(6, 0)
        };
        let output = build(src, &forced);
        assert_eq!(ranges(&output), vec![(0, 23), (23, 40)]);
        assert!(output.chunks.iter().all(|c| !c.oversized));
    }

    #[test]
    fn test_oversized_function_with_inner_helpers_stays_function() {
        let src = "function big(){function a(){return 1}function b(){return 2}function c(){return 3}return a()+b()+c()}";
        let output = build(src, &chunking(6, 0));
        assert_eq!(ranges(&output), vec![(0, src.len())]);
        assert!(output.chunks[0].oversized);
        assert_eq!(output.chunks[0].kind, ChunkKind::Function);
    }

    #[test]
    fn test_malformed_input_yields_trailing_chunk() {
        let output = build("function a(){return 'unterminated", &ChunkingConfig::default());
        assert_eq!(ranges(&output), vec![(0, 33)]);
        assert!(matches!(
            output.notes.as_slice(),
            [RunNote::MalformedInputBoundary { offset: 20, .. }]
        ));
    }

    #[test]
    fn test_empty_buffer_has_no_chunks() {
        let output = build("", &ChunkingConfig::default());
        assert!(output.chunks.is_empty());
    }

    #[test]
    fn test_library_dominated_chunk() {
        let src = "var a=1;var b=2;";
        let buffer = SourceBuffer::new(src);
        let scan = BoundaryScanner::new(&buffer).collect_result();
        let libraries = vec![LibraryMatch {
            name: "lib".into(),
            version: None,
            confidence: 0.9,
            byte_range: ByteRange::new(0, 10),
            should_filter: true,
            informational: false,
            signature_index: 0,
        }];
        let config = chunking(2, 0);
        let output = ChunkBuilder::new(&buffer, &config).build(&scan, &libraries);
        assert_eq!(output.chunks[0].kind, ChunkKind::Library);
        assert_eq!(output.chunks[0].library.as_deref(), Some("lib"));
        assert_eq!(output.chunks[1].library, None);
    }

    #[test]
    fn test_dependencies_reference_chunk_ids() {
        let src = "function helper(){return 1};var result=helper();";
        let output = build(src, &chunking(7, 0));
        assert_eq!(output.chunks.len(), 2);
        assert!(output.chunks[1]
            .dependencies
            .contains(&output.chunks[0].id));
    }
}
