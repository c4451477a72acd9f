//! Lexical boundary scanner.
//!
//! Finds offsets where the source can be cut without breaking a string,
//! comment, template literal, regex literal or bracket pair. This is not a
//! parser: it only promises safe-split detection, never semantic correctness.
//! Regex-vs-division is decided from the previous significant token, which
//! is the only look-back the scanner keeps.
//!
//! The scanner never fails. Malformed input (an unterminated string at end of
//! file, unbalanced brackets) just means no further safe splits are found; the
//! condition is reported through [`ScanOutcome`] once the iterator is drained.

use crate::source::{ByteRange, SourceBuffer};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Classification of a boundary mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    /// End of a statement or declaration at the split depth
    SafeSplit,
    /// Start of a string, comment, template or regex literal
    Unsafe,
}

/// A classified offset produced by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryMark {
    pub offset: usize,
    pub kind: BoundaryKind,
}

/// What made the tail of the input unsplittable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedKind {
    UnterminatedString,
    UnterminatedTemplate,
    UnterminatedComment,
    UnterminatedRegex,
    UnbalancedBrackets,
}

impl MalformedKind {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::UnterminatedString => "unterminated string literal",
            Self::UnterminatedTemplate => "unterminated template literal",
            Self::UnterminatedComment => "unterminated block comment",
            Self::UnterminatedRegex => "unterminated regular expression",
            Self::UnbalancedBrackets => "unbalanced brackets",
        }
    }
}

/// Malformed region found while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Malformed {
    pub kind: MalformedKind,
    /// Where the offending construct opened
    pub offset: usize,
}

/// State reported after the iterator is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub malformed: Option<Malformed>,
}

/// Collected result of a full scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Ascending safe-split offsets, excluding the range ends
    pub safe_splits: Vec<usize>,
    pub unsafe_marks: usize,
    pub malformed: Option<Malformed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Str(u8),
    Template,
    LineComment,
    BlockComment,
    Regex { in_class: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Brace(usize),
    Paren(usize),
    Bracket(usize),
    /// `${` inside a template that opened at the given offset
    TemplateExpr(usize),
}

impl Frame {
    fn offset(&self) -> usize {
        match *self {
            Frame::Brace(o) | Frame::Paren(o) | Frame::Bracket(o) | Frame::TemplateExpr(o) => o,
        }
    }
}

/// Marker stored in `last_sig` after an identifier, number or keyword.
const WORD: u8 = b'a';
/// Marker stored in `last_sig` after a string, template or regex literal.
const VALUE: u8 = b'"';
const MAX_WORD: usize = 16;

/// Keywords after which `/` starts a regex literal.
const REGEX_PREFIX_KEYWORDS: &[&[u8]] = &[
    b"return", b"typeof", b"case", b"do", b"else", b"in", b"of", b"new", b"delete", b"void",
    b"throw", b"instanceof", b"yield", b"await",
];

/// Words that continue the statement a closing brace belongs to.
const CONTINUATION_KEYWORDS: &[&[u8]] = &[
    b"else", b"catch", b"finally", b"while", b"instanceof", b"in", b"of",
];

/// Lazy, single-pass boundary scanner over a range of a buffer.
///
/// Cloning a scanner snapshots its state, so a scan can be resumed from any
/// point.
#[derive(Debug, Clone)]
pub struct BoundaryScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    split_depth: usize,
    split_on_commas: bool,
    mode: Mode,
    region_start: usize,
    stack: Vec<Frame>,
    last_sig: Option<u8>,
    word: Vec<u8>,
    in_word: bool,
    /// Offset after a `}` awaiting the next significant token
    pending: Option<usize>,
    deferred: Vec<BoundaryMark>,
    queue: VecDeque<BoundaryMark>,
    first_underflow: Option<usize>,
    done: bool,
    outcome: ScanOutcome,
}

impl<'a> BoundaryScanner<'a> {
    /// Scan the whole buffer for top-level boundaries.
    pub fn new(buffer: &'a SourceBuffer) -> Self {
        Self::over(buffer, ByteRange::new(0, buffer.len()), 0)
    }

    /// Scan `range`, treating its start as code at depth 0 and reporting
    /// boundaries at `split_depth`. At nested depths, `,` also separates
    /// elements.
    pub fn over(buffer: &'a SourceBuffer, range: ByteRange, split_depth: usize) -> Self {
        Self {
            bytes: buffer.as_bytes(),
            pos: range.start,
            end: range.end.min(buffer.len()),
            split_depth,
            split_on_commas: split_depth > 0,
            mode: Mode::Code,
            region_start: range.start,
            stack: Vec::new(),
            last_sig: None,
            word: Vec::with_capacity(MAX_WORD),
            in_word: false,
            pending: None,
            deferred: Vec::new(),
            queue: VecDeque::new(),
            first_underflow: None,
            done: false,
            outcome: ScanOutcome::default(),
        }
    }

    /// Malformed-input report; complete once the iterator returned `None`.
    pub fn outcome(&self) -> &ScanOutcome {
        &self.outcome
    }

    /// Drain the scanner into a collected result.
    pub fn collect_result(mut self) -> ScanResult {
        let mut result = ScanResult::default();
        for mark in self.by_ref() {
            match mark.kind {
                BoundaryKind::SafeSplit => result.safe_splits.push(mark.offset),
                BoundaryKind::Unsafe => result.unsafe_marks += 1,
            }
        }
        result.malformed = self.outcome.malformed;
        result
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        if offset < self.end {
            Some(self.bytes[offset])
        } else {
            None
        }
    }

    fn emit(&mut self, mark: BoundaryMark) {
        if self.pending.is_some() {
            self.deferred.push(mark);
        } else {
            self.queue.push_back(mark);
        }
    }

    fn emit_safe(&mut self, offset: usize) {
        if offset < self.end {
            self.emit(BoundaryMark {
                offset,
                kind: BoundaryKind::SafeSplit,
            });
        }
    }

    fn open_region(&mut self, at: usize, mode: Mode) {
        self.region_start = at;
        self.mode = mode;
        self.emit(BoundaryMark {
            offset: at,
            kind: BoundaryKind::Unsafe,
        });
    }

    /// Decide a pending `}` split once the next significant token is known.
    fn resolve_pending(&mut self, accept: bool) {
        if let Some(offset) = self.pending.take() {
            if accept && offset < self.end {
                self.queue.push_back(BoundaryMark {
                    offset,
                    kind: BoundaryKind::SafeSplit,
                });
            }
            self.queue.extend(self.deferred.drain(..));
        }
    }

    fn finish_word(&mut self) {
        self.in_word = false;
        self.last_sig = Some(WORD);
        if self.pending.is_some() {
            let continues = CONTINUATION_KEYWORDS.contains(&self.word.as_slice());
            self.resolve_pending(!continues);
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last_sig {
            None => true,
            Some(WORD) => REGEX_PREFIX_KEYWORDS.contains(&self.word.as_slice()),
            Some(b')') | Some(b']') | Some(VALUE) => false,
            Some(_) => true,
        }
    }

    fn pop_frame(&mut self, at: usize) -> Option<Frame> {
        match self.stack.last() {
            Some(Frame::TemplateExpr(_)) | None => {
                if self.stack.is_empty() && self.first_underflow.is_none() {
                    self.first_underflow = Some(at);
                }
                None
            }
            Some(_) => self.stack.pop(),
        }
    }

    fn step_code(&mut self, i: usize, b: u8) {
        if is_ident_byte(b) {
            if !self.in_word {
                self.in_word = true;
                self.word.clear();
            }
            // Keywords are shorter than MAX_WORD, so a capped word never matches one.
            if self.word.len() < MAX_WORD {
                self.word.push(b);
            }
            self.pos += 1;
            return;
        }

        if self.in_word {
            self.finish_word();
        }

        match b {
            b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => {
                self.pos += 1;
            }
            b'/' => match self.peek(i + 1) {
                Some(b'/') => {
                    self.open_region(i, Mode::LineComment);
                    self.pos += 2;
                }
                Some(b'*') => {
                    self.open_region(i, Mode::BlockComment);
                    self.pos += 2;
                }
                _ if self.regex_allowed() => {
                    self.resolve_pending(true);
                    self.open_region(i, Mode::Regex { in_class: false });
                    self.pos += 1;
                }
                _ => {
                    self.resolve_pending(false);
                    self.last_sig = Some(b'/');
                    self.pos += 1;
                }
            },
            b'\'' | b'"' => {
                self.resolve_pending(true);
                self.open_region(i, Mode::Str(b));
                self.pos += 1;
            }
            b'`' => {
                self.resolve_pending(true);
                self.open_region(i, Mode::Template);
                self.pos += 1;
            }
            b'{' | b'(' | b'[' => {
                self.resolve_pending(false);
                self.stack.push(match b {
                    b'{' => Frame::Brace(i),
                    b'(' => Frame::Paren(i),
                    _ => Frame::Bracket(i),
                });
                self.last_sig = Some(b);
                self.pos += 1;
            }
            b'}' => {
                self.resolve_pending(false);
                self.pos += 1;
                if let Some(Frame::TemplateExpr(start)) = self.stack.last().copied() {
                    self.stack.pop();
                    self.region_start = start;
                    self.mode = Mode::Template;
                    return;
                }
                self.pop_frame(i);
                self.last_sig = Some(b'}');
                if self.depth() == self.split_depth {
                    self.pending = Some(i + 1);
                }
            }
            b')' | b']' => {
                self.resolve_pending(false);
                self.pop_frame(i);
                self.last_sig = Some(b);
                self.pos += 1;
            }
            b';' => {
                self.resolve_pending(false);
                self.last_sig = Some(b';');
                self.pos += 1;
                if self.depth() == self.split_depth {
                    self.emit_safe(i + 1);
                }
            }
            b',' => {
                self.resolve_pending(false);
                self.last_sig = Some(b',');
                self.pos += 1;
                if self.split_on_commas && self.depth() == self.split_depth {
                    self.emit_safe(i + 1);
                }
            }
            b'!' | b'~' => {
                self.resolve_pending(true);
                self.last_sig = Some(b);
                self.pos += 1;
            }
            _ => {
                self.resolve_pending(false);
                self.last_sig = Some(b);
                self.pos += 1;
            }
        }
    }

    fn step(&mut self) {
        let i = self.pos;
        let b = self.bytes[i];
        match self.mode {
            Mode::Code => self.step_code(i, b),
            Mode::Str(quote) => match b {
                b'\\' => self.pos += 2,
                b'\n' => {
                    // A raw newline cannot appear in a quoted string; resync.
                    self.mode = Mode::Code;
                    self.last_sig = Some(VALUE);
                    self.pos += 1;
                }
                _ if b == quote => {
                    self.mode = Mode::Code;
                    self.last_sig = Some(VALUE);
                    self.pos += 1;
                }
                _ => self.pos += 1,
            },
            Mode::Template => match b {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.mode = Mode::Code;
                    self.last_sig = Some(VALUE);
                    self.pos += 1;
                }
                b'$' if self.peek(i + 1) == Some(b'{') => {
                    self.stack.push(Frame::TemplateExpr(self.region_start));
                    self.mode = Mode::Code;
                    self.last_sig = Some(b'{');
                    self.pos += 2;
                }
                _ => self.pos += 1,
            },
            Mode::LineComment => {
                if b == b'\n' {
                    self.mode = Mode::Code;
                }
                self.pos += 1;
            }
            Mode::BlockComment => {
                if b == b'*' && self.peek(i + 1) == Some(b'/') {
                    self.mode = Mode::Code;
                    self.pos += 2;
                } else {
                    self.pos += 1;
                }
            }
            Mode::Regex { in_class } => match b {
                b'\\' => self.pos += 2,
                b'\n' => {
                    // Not a regex after all; resync on the next line.
                    self.mode = Mode::Code;
                    self.pos += 1;
                }
                b'[' => {
                    self.mode = Mode::Regex { in_class: true };
                    self.pos += 1;
                }
                b']' if in_class => {
                    self.mode = Mode::Regex { in_class: false };
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.mode = Mode::Code;
                    self.last_sig = Some(VALUE);
                    self.pos += 1;
                }
                _ => self.pos += 1,
            },
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if self.in_word {
            self.finish_word();
        }
        // The range end is an implicit boundary; a trailing `}` adds nothing.
        self.resolve_pending(false);

        let template_open = self.stack.iter().find_map(|frame| match frame {
            Frame::TemplateExpr(start) => Some(*start),
            _ => None,
        });

        let malformed = match self.mode {
            Mode::Str(_) => Some((MalformedKind::UnterminatedString, self.region_start)),
            Mode::Template => Some((MalformedKind::UnterminatedTemplate, self.region_start)),
            Mode::BlockComment => Some((MalformedKind::UnterminatedComment, self.region_start)),
            Mode::Regex { .. } => Some((MalformedKind::UnterminatedRegex, self.region_start)),
            Mode::Code | Mode::LineComment => {
                if let Some(start) = template_open {
                    Some((MalformedKind::UnterminatedTemplate, start))
                } else if let Some(frame) = self.stack.first() {
                    Some((MalformedKind::UnbalancedBrackets, frame.offset()))
                } else {
                    self.first_underflow
                        .map(|at| (MalformedKind::UnbalancedBrackets, at))
                }
            }
        };

        self.outcome.malformed = malformed.map(|(kind, offset)| Malformed { kind, offset });
    }
}

impl Iterator for BoundaryScanner<'_> {
    type Item = BoundaryMark;

    fn next(&mut self) -> Option<BoundaryMark> {
        loop {
            if let Some(mark) = self.queue.pop_front() {
                return Some(mark);
            }
            if self.done {
                return None;
            }
            if self.pos >= self.end {
                self.pos = self.end;
                self.finish();
            } else {
                self.step();
            }
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn safe_splits(src: &str) -> Vec<usize> {
        let buffer = SourceBuffer::new(src);
        BoundaryScanner::new(&buffer).collect_result().safe_splits
    }

    #[test]
    fn test_splits_between_functions() {
        let src = "function a(){eval(x)}function b(){return 1}";
        assert_eq!(safe_splits(src), vec![21]);
    }

    #[test]
    fn test_semicolons_at_top_level_only() {
        let src = "var a=1;for(var i=0;i<2;i++){f(i);}var b=2;";
        let splits = safe_splits(src);
        assert_eq!(splits, vec![8, 35]);
    }

    #[test]
    fn test_no_split_inside_strings_and_comments() {
        let src = "var s='a;b}c';/* x; y; */var t=\"q;\";// z;\nvar u=1;";
        let splits = safe_splits(src);
        assert_eq!(splits, vec![14, 36]);
    }

    #[test]
    fn test_template_literal_with_nested_expression() {
        let src = "var t=`a;${f({x:1});`b;`}c;`;var d=1;";
        let splits = safe_splits(src);
        assert_eq!(splits, vec![29]);
    }

    #[test]
    fn test_regex_literal_is_not_split() {
        let src = "var r=/;}[/]/g;var q=a/b;x=1;";
        assert_eq!(safe_splits(src), vec![15, 25]);
    }

    #[test]
    fn test_regex_after_return_keyword() {
        let src = "function f(){return /;/.test(x)}var y=1;";
        assert_eq!(safe_splits(src), vec![32]);
    }

    #[test]
    fn test_long_identifier_with_keyword_prefix_is_division() {
        let src = "var n=returnValueFromServerCall/2;var m=1;";
        let buffer = SourceBuffer::new(src);
        let result = BoundaryScanner::new(&buffer).collect_result();
        assert_eq!(result.safe_splits, vec![34]);
        assert!(result.malformed.is_none());
    }

    #[test]
    fn test_else_and_iife_calls_do_not_split() {
        assert!(safe_splits("if(a){b()}else{c()}").is_empty());
        assert!(safe_splits("(function(){x()})()").is_empty());
        assert!(safe_splits("try{a()}catch(e){}finally{b()}").is_empty());
    }

    #[test]
    fn test_bang_iife_after_brace_splits() {
        let src = "function a(){}!function(){}();";
        assert_eq!(safe_splits(src), vec![14]);
    }

    #[test]
    fn test_marks_are_ascending_with_deferred_comment() {
        let buffer = SourceBuffer::new("function a(){} /* c */ function b(){}");
        let marks: Vec<BoundaryMark> = BoundaryScanner::new(&buffer).collect();
        let offsets: Vec<usize> = marks.iter().map(|m| m.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
        assert_eq!(
            marks,
            vec![
                BoundaryMark { offset: 14, kind: BoundaryKind::SafeSplit },
                BoundaryMark { offset: 15, kind: BoundaryKind::Unsafe },
            ]
        );
    }

    #[test]
    fn test_unterminated_string_degrades() {
        let buffer = SourceBuffer::new("function a(){return 'unterminated");
        let result = BoundaryScanner::new(&buffer).collect_result();
        assert!(result.safe_splits.is_empty());
        let malformed = result.malformed.unwrap();
        assert_eq!(malformed.kind, MalformedKind::UnterminatedString);
        assert_eq!(malformed.offset, 20);
    }

    #[test]
    fn test_splits_before_malformed_tail_survive() {
        let buffer = SourceBuffer::new("var a=1;var b=2;var c=`open");
        let result = BoundaryScanner::new(&buffer).collect_result();
        assert_eq!(result.safe_splits, vec![8, 16]);
        assert_eq!(
            result.malformed.map(|m| m.kind),
            Some(MalformedKind::UnterminatedTemplate)
        );
    }

    #[test]
    fn test_unbalanced_brackets_reported() {
        let buffer = SourceBuffer::new("function a(){var b=1;");
        let result = BoundaryScanner::new(&buffer).collect_result();
        assert!(result.safe_splits.is_empty());
        assert_eq!(
            result.malformed,
            Some(Malformed { kind: MalformedKind::UnbalancedBrackets, offset: 12 })
        );

        let extra = SourceBuffer::new("a();}b();");
        let result = BoundaryScanner::new(&extra).collect_result();
        assert_eq!(result.safe_splits, vec![4, 5]);
        assert_eq!(result.malformed.map(|m| m.offset), Some(4));
    }

    #[test]
    fn test_nested_scan_splits_statements_and_elements() {
        let src = "!function(e){var a=1;b(a),c({x:1});d()}(window);";
        let buffer = SourceBuffer::new(src);
        let splits = BoundaryScanner::over(&buffer, ByteRange::new(0, src.len()), 1)
            .collect_result()
            .safe_splits;
        // `(e)` is at depth 1 too but holds no separators
        assert_eq!(splits, vec![21, 26, 35]);
    }

    #[test]
    fn test_sub_range_scan_uses_absolute_offsets() {
        let src = "var x=0;function f(){a();b();}";
        let buffer = SourceBuffer::new(src);
        let splits = BoundaryScanner::over(&buffer, ByteRange::new(8, src.len()), 1)
            .collect_result()
            .safe_splits;
        assert_eq!(splits, vec![25, 29]);
    }

    #[test]
    fn test_scanner_clone_resumes() {
        let buffer = SourceBuffer::new("a;b;c;d;");
        let mut scanner = BoundaryScanner::new(&buffer);
        assert_eq!(scanner.next().map(|m| m.offset), Some(2));
        let snapshot = scanner.clone();
        let rest: Vec<usize> = scanner.map(|m| m.offset).collect();
        let resumed: Vec<usize> = snapshot.map(|m| m.offset).collect();
        assert_eq!(rest, vec![4, 6]);
        assert_eq!(rest, resumed);
    }

    #[test]
    fn test_never_panics_on_garbage() {
        for src in ["\\", "'\\", "`${", "/*", "/", "}}}", "((((", "`${`${`", "a/[/"] {
            let buffer = SourceBuffer::new(src);
            let _ = BoundaryScanner::new(&buffer).collect_result();
        }
    }
}
