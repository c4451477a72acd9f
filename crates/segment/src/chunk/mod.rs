//! Chunks: token-budgeted byte ranges of the source.
//!
//! This module provides:
//! - The `Chunk` type and its classification
//! - `ChunkBuilder`, which packs scanner boundaries into chunks
//! - Heuristic dependency edges between chunks

mod builder;
mod classify;
mod dependencies;

pub use builder::{BuildOutput, ChunkBuilder};
pub use classify::classify;
pub use dependencies::{link_dependencies, IdentifierIndex};

use crate::source::ByteRange;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Structural role of a chunk, judged from its leading construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Function,
    Class,
    Module,
    Global,
    EventHandler,
    Library,
    Utility,
    Unknown,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Module => "module",
            Self::Global => "global",
            Self::EventHandler => "event-handler",
            Self::Library => "library",
            Self::Utility => "utility",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous analysis unit.
///
/// `byte_range` is the primary range: primary ranges tile the buffer exactly.
/// `context_start..byte_range.start` is trailing context from the previous
/// chunk, sent to the analyzer for continuity and never counted as primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable hash of the primary range and buffer revision
    pub id: String,

    /// Position in source order
    pub index: usize,

    pub byte_range: ByteRange,

    pub context_start: usize,

    /// Tokens of the primary range
    pub primary_tokens: usize,

    /// Tokens of the overlap prefix
    pub context_tokens: usize,

    /// Tokens sent to the analyzer (primary + context)
    pub estimated_tokens: usize,

    pub kind: ChunkKind,

    /// A single construct larger than the token limit
    pub oversized: bool,

    pub importance: f64,

    /// Ids of chunks declaring identifiers this chunk uses
    pub dependencies: BTreeSet<String>,

    /// Filtering library that dominates this chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

impl Chunk {
    /// Range sent to the analyzer, context included.
    pub fn analysis_range(&self) -> ByteRange {
        ByteRange::new(self.context_start, self.byte_range.end)
    }

    /// Overlap prefix; empty for the first chunk or when overlap is off.
    pub fn context_range(&self) -> ByteRange {
        ByteRange::new(self.context_start, self.byte_range.start)
    }

    pub fn is_library(&self) -> bool {
        self.kind == ChunkKind::Library
    }
}

/// Stable chunk id: 16 hex chars of SHA-256 over the range and revision.
pub fn chunk_id(range: ByteRange, revision: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", range.start, range.end, revision).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
