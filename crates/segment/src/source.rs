//! Immutable source buffer with line index.

use bundlescope_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Half-open byte range `[start, end)` into a `SourceBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted range {}..{}", start, end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Number of bytes shared with `other`.
    pub fn intersection_len(&self, other: &ByteRange) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }
}

/// Resolved position in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Absolute byte offset
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based byte column
    pub column: usize,
}

/// Raw source text plus a sorted index of line-start offsets.
///
/// Never mutated after load; every pipeline stage borrows it.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    text: String,
    line_starts: Vec<usize>,
    revision: String,
}

impl SourceBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = Vec::with_capacity(text.len() / 80 + 1);
        line_starts.push(0);
        line_starts.extend(newline_offsets(text.as_bytes()).map(|i| i + 1));

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let revision = digest[..16].to_string();

        Self {
            text,
            line_starts,
            revision,
        }
    }

    /// Load a buffer from disk.
    ///
    /// Unreadable or non-UTF-8 input is an `AppError::Input` and aborts the run.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::Input(format!("Failed to read {:?}: {}", path, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| AppError::Input(format!("{:?} is not valid UTF-8: {}", path, e)))?;

        tracing::debug!("Loaded {:?} ({} bytes)", path, text.len());
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Short content digest; identical text always yields the same revision.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Text in `range`. Range ends must sit on char boundaries.
    pub fn slice(&self, range: ByteRange) -> &str {
        &self.text[range.start..range.end]
    }

    /// Resolve an offset to line and column. Offsets past the end clamp to it.
    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.text.len());
        let line_idx = self.line_starts.partition_point(|&start| start <= offset) - 1;
        Location {
            offset,
            line: line_idx + 1,
            column: offset - self.line_starts[line_idx] + 1,
        }
    }

    /// Offset of the first byte of 1-based `line`, if it exists.
    pub fn line_offset(&self, line: usize) -> Option<usize> {
        line.checked_sub(1)
            .and_then(|idx| self.line_starts.get(idx))
            .copied()
    }

    /// Largest char boundary `<= offset`.
    pub fn floor_char_boundary(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    /// Smallest char boundary `>= offset`.
    pub fn ceil_char_boundary(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset += 1;
        }
        offset
    }
}

fn newline_offsets(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .map(|(i, _)| i)
}
