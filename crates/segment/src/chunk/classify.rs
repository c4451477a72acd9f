//! Chunk classification from the leading construct.

use super::ChunkKind;
use once_cell::sync::Lazy;
use regex::Regex;

/// How far past the leading construct classification looks.
const LEAD_WINDOW: usize = 256;
/// Average bytes per declaration below which a run of functions is a utility block.
const UTILITY_AVG_BYTES: usize = 512;

static FUNCTION_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][\w$.]*\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)")
        .expect("static regex")
});

static DECLARED_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:var|let|const)\s+[A-Za-z_$][\w$]*\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)")
        .expect("static regex")
});

static DECLARED_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:var|let|const)\s+[A-Za-z_$][\w$]*\s*=\s*class\b").expect("static regex")
});

static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"addEventListener\s*\(|\.on[a-z]+\s*=\s*(?:function\b|\(|[A-Za-z_$])|\.on\(\s*['\x22][a-z]")
        .expect("static regex")
});

static BUNDLER_RUNTIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(?\s*(?:self|window|globalThis|this)\s*\.\s*webpack(?:Chunk|Jsonp)|^__webpack_require__|^System\.register|^(?:module\.)?exports\b|^Object\.defineProperty\(\s*exports")
        .expect("static regex")
});

static FUNCTION_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\s*\*?\s*[A-Za-z_$][\w$]*\s*\(").expect("static regex"));

const MODULE_PREFIXES: &[&str] = &[
    "import ",
    "import{",
    "import*",
    "export ",
    "export{",
    "export*",
    "!function",
    "(function",
    "(()=>",
    "(() =>",
    "(async",
    "define(",
    "require(",
    "\"use strict\"",
    "'use strict'",
];

/// Classify a chunk's primary text.
///
/// A chunk dominated by a filtering library is always `Library`.
pub fn classify(text: &str, library: Option<&str>) -> ChunkKind {
    if library.is_some() {
        return ChunkKind::Library;
    }

    let lead = leading_code(text);
    if lead.is_empty() {
        return ChunkKind::Unknown;
    }
    let window = &lead[..floor_boundary(lead, LEAD_WINDOW)];

    if starts_function(lead) {
        let declarations = FUNCTION_DECL.find_iter(text).count();
        if declarations >= 3 && text.len() / declarations <= UTILITY_AVG_BYTES {
            return ChunkKind::Utility;
        }
        return ChunkKind::Function;
    }
    if lead.starts_with("class ") || lead.starts_with("class{") || DECLARED_CLASS.is_match(window) {
        return ChunkKind::Class;
    }
    if MODULE_PREFIXES.iter().any(|p| lead.starts_with(p)) || BUNDLER_RUNTIME.is_match(window) {
        return ChunkKind::Module;
    }
    if DECLARED_FUNCTION.is_match(window) {
        return ChunkKind::Function;
    }
    if EVENT_HANDLER.is_match(window) {
        return ChunkKind::EventHandler;
    }
    if FUNCTION_ASSIGN.is_match(window) {
        return ChunkKind::Function;
    }
    if ["var ", "let ", "const "].iter().any(|p| lead.starts_with(p)) {
        return ChunkKind::Global;
    }
    ChunkKind::Unknown
}

/// Whether the text opens with a function or class declaration.
///
/// Oversized chunks that start this way are kept whole unless the caller
/// opts into splitting function bodies.
pub(crate) fn is_declaration(text: &str) -> bool {
    let lead = leading_code(text);
    let window = &lead[..floor_boundary(lead, LEAD_WINDOW)];
    starts_function(lead)
        || lead.starts_with("class ")
        || DECLARED_FUNCTION.is_match(window)
        || DECLARED_CLASS.is_match(window)
}

fn starts_function(lead: &str) -> bool {
    let plain = lead.starts_with("function")
        && !lead[8..].starts_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$');
    plain || lead.starts_with("async function")
}

/// Text after leading whitespace, comments and empty statements.
fn leading_code(text: &str) -> &str {
    let mut rest = text;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if let Some(after) = trimmed.strip_prefix("//") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
        } else {
            return trimmed;
        }
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
