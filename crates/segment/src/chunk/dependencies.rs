//! Heuristic dependency edges between chunks.
//!
//! A chunk depends on another when it uses an identifier the other declares or
//! assigns. There is no scope resolution: edges are a priority signal only.

use super::Chunk;
use std::collections::{BTreeMap, BTreeSet};

/// Identifiers declared by more chunks than this are too ambiguous to link.
const MAX_DECLARING_CHUNKS: usize = 8;

const KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "else", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "of", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield", "arguments", "window", "document", "self", "globalThis",
];

const DECLARATORS: &[&str] = &["var", "let", "const", "function", "class"];

/// Declared and used identifiers of one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierIndex {
    pub declared: BTreeSet<String>,
    pub used: BTreeSet<String>,
}

impl IdentifierIndex {
    /// Collect identifiers from `text`, ignoring property names, keywords,
    /// string and comment contents, and names shorter than `min_len`.
    pub fn from_text(text: &str, min_len: usize) -> Self {
        let mut index = Self::default();
        let bytes = text.as_bytes();
        let mut i = 0;
        let mut prev_sig: Option<u8> = None;
        let mut prev_word: &str = "";

        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'\'' | b'"' | b'`' => {
                    i = skip_quoted(bytes, i);
                    prev_sig = Some(b'"');
                    prev_word = "";
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = bytes[i..]
                        .iter()
                        .position(|&c| c == b'\n')
                        .map_or(bytes.len(), |p| i + p + 1);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = text[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                }
                _ if is_ident_start(b) => {
                    let start = i;
                    while i < bytes.len() && is_ident_continue(bytes[i]) {
                        i += 1;
                    }
                    let word = &text[start..i];
                    let is_property = prev_sig == Some(b'.');
                    if !is_property && word.len() >= min_len && !KEYWORDS.contains(&word) {
                        let declared = DECLARATORS.contains(&prev_word) || is_assignment(bytes, i);
                        if declared {
                            index.declared.insert(word.to_string());
                        } else {
                            index.used.insert(word.to_string());
                        }
                    }
                    prev_sig = Some(b'a');
                    prev_word = word;
                }
                _ if b.is_ascii_digit() => {
                    while i < bytes.len() && is_ident_continue(bytes[i]) {
                        i += 1;
                    }
                    prev_sig = Some(b'0');
                    prev_word = "";
                }
                _ if b.is_ascii_whitespace() => i += 1,
                _ => {
                    prev_sig = Some(b);
                    // `function*`, `async function` keep the declarator
                    if b != b'*' {
                        prev_word = "";
                    }
                    i += 1;
                }
            }
        }
        index
    }
}

/// Record, on every chunk, the ids of chunks declaring identifiers it uses.
///
/// `indexes[i]` must describe `chunks[i]`.
pub fn link_dependencies(chunks: &mut [Chunk], indexes: &[IdentifierIndex]) {
    let mut declarers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (position, index) in indexes.iter().enumerate() {
        for name in &index.declared {
            declarers.entry(name.as_str()).or_default().push(position);
        }
    }

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    for (position, chunk) in chunks.iter_mut().enumerate() {
        let Some(index) = indexes.get(position) else {
            continue;
        };
        for name in index.used.iter().filter(|n| !index.declared.contains(*n)) {
            let Some(owners) = declarers.get(name.as_str()) else {
                continue;
            };
            if owners.len() > MAX_DECLARING_CHUNKS {
                continue;
            }
            for &owner in owners.iter().filter(|&&o| o != position) {
                chunk.dependencies.insert(ids[owner].clone());
            }
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// `name =` but not `name ==` or `name =>`.
fn is_assignment(bytes: &[u8], mut i: usize) -> bool {
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    bytes.get(i) == Some(&b'=') && !matches!(bytes.get(i + 1), Some(b'=') | Some(b'>'))
}

fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return i + 1,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkKind;
    use crate::source::ByteRange;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            index: 0,
            byte_range: ByteRange::new(0, 0),
            context_start: 0,
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
    fn test_declarations_and_uses() {
        let index = IdentifierIndex::from_text(
            "function helper(arg){var total=arg+base;obj.prop=1;return total}",
            3,
        );
        assert!(index.declared.contains("helper"));
        assert!(index.declared.contains("total"));
        assert!(index.used.contains("arg"));
        assert!(index.used.contains("base"));
        assert!(index.used.contains("obj"));
        assert!(!index.used.contains("prop"));
        assert!(!index.declared.contains("prop"));
        assert!(!index.used.contains("return"));
    }

    #[test]
    fn test_strings_comments_and_short_names_ignored() {
        let index = IdentifierIndex::from_text("x=1;/* hidden */ call('quoted', y == zed) // tail", 3);
        assert!(index.used.contains("call"));
        assert!(index.used.contains("zed"));
        assert!(!index.used.contains("quoted"));
        assert!(!index.used.contains("hidden"));
        assert!(!index.used.contains("tail"));
        assert!(index.declared.is_empty());
    }

    #[test]
    fn test_link_dependencies() {
        let texts = [
            "function helper(){return 1}",
            "var result=helper();",
            "var other=result+helper();",
        ];
        let indexes: Vec<IdentifierIndex> =
            texts.iter().map(|t| IdentifierIndex::from_text(t, 3)).collect();
        let mut chunks = vec![chunk("a"), chunk("b"), chunk("c")];
        link_dependencies(&mut chunks, &indexes);

        assert!(chunks[0].dependencies.is_empty());
        assert_eq!(
            chunks[1].dependencies.iter().cloned().collect::<Vec<_>>(),
            vec!["a".to_string()]
        );
        assert_eq!(
            chunks[2].dependencies.iter().cloned().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
