//! Library and bundler fingerprint matching.
//!
//! Signatures are opaque rule data: a name, literal and regex patterns, an
//! optional version pattern and a confidence. Hits of one signature that lie
//! close together are clustered into a single candidate region; overlapping
//! candidates of different signatures are then resolved deterministically.
//! Confidence is a ranking heuristic only. A match never removes bytes from
//! the buffer, it only lowers the importance of chunks it covers.

use crate::source::{ByteRange, SourceBuffer};
use crate::types::DetectedLibrary;
use bundlescope_core::{AppError, AppResult, LibraryConfig};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fingerprint pattern; exactly one of `literal` or `regex` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl SignaturePattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            literal: Some(text.into()),
            regex: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            literal: None,
            regex: Some(pattern.into()),
        }
    }

    fn to_regex_source(&self, signature: &str) -> AppResult<String> {
        match (&self.literal, &self.regex) {
            (Some(literal), None) if !literal.is_empty() => Ok(regex::escape(literal)),
            (None, Some(pattern)) if !pattern.is_empty() => Ok(pattern.clone()),
            _ => Err(AppError::Rules(format!(
                "signature '{}': each pattern needs exactly one non-empty literal or regex",
                signature
            ))),
        }
    }
}

/// A known-library or bundler-runtime fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySignature {
    pub name: String,
    pub patterns: Vec<SignaturePattern>,
    /// Regex whose first capture group (or whole match) is the version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_pattern: Option<String>,
    pub confidence: f64,
    #[serde(default = "default_should_filter")]
    pub should_filter: bool,
}

fn default_should_filter() -> bool {
    true
}

/// A resolved library region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMatch {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub confidence: f64,
    pub byte_range: ByteRange,
    /// Whether the region lowers chunk importance
    pub should_filter: bool,
    /// Below the confidence threshold; reported but never filtered
    pub informational: bool,
    /// Position of the signature in the rule table
    #[serde(skip)]
    pub signature_index: usize,
}

struct CompiledSignature {
    signature: LibrarySignature,
    patterns: Vec<Regex>,
    version: Option<Regex>,
}

/// Compiled signature table.
pub struct LibraryMatcher {
    signatures: Vec<CompiledSignature>,
    /// Flattened pattern set; `owners[i]` is the signature of pattern `i`
    set: RegexSet,
    owners: Vec<(usize, usize)>,
    min_confidence: f64,
    version_window: usize,
    cluster_gap: usize,
}

impl std::fmt::Debug for LibraryMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryMatcher")
            .field("signatures", &self.signatures.len())
            .field("patterns", &self.owners.len())
            .finish()
    }
}

impl LibraryMatcher {
    /// Compile signatures; fails with `AppError::Rules` on an invalid pattern.
    pub fn new(signatures: &[LibrarySignature], config: &LibraryConfig) -> AppResult<Self> {
        let mut compiled = Vec::with_capacity(signatures.len());
        let mut sources = Vec::new();
        let mut owners = Vec::new();

        for (index, signature) in signatures.iter().enumerate() {
            if signature.patterns.is_empty() {
                return Err(AppError::Rules(format!(
                    "signature '{}' has no patterns",
                    signature.name
                )));
            }
            if !(0.0..=1.0).contains(&signature.confidence) {
                return Err(AppError::Rules(format!(
                    "signature '{}': confidence must be within [0, 1]",
                    signature.name
                )));
            }

            let mut patterns = Vec::with_capacity(signature.patterns.len());
            for (pattern_index, pattern) in signature.patterns.iter().enumerate() {
                let source = pattern.to_regex_source(&signature.name)?;
                patterns.push(compile(&signature.name, &source)?);
                sources.push(source);
                owners.push((index, pattern_index));
            }

            let version = signature
                .version_pattern
                .as_deref()
                .map(|source| compile(&signature.name, source))
                .transpose()?;

            compiled.push(CompiledSignature {
                signature: signature.clone(),
                patterns,
                version,
            });
        }

        let set = RegexSet::new(&sources)
            .map_err(|e| AppError::Rules(format!("library signature set: {}", e)))?;

        Ok(Self {
            signatures: compiled,
            set,
            owners,
            min_confidence: config.min_confidence,
            version_window: config.version_window,
            cluster_gap: config.cluster_gap,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Find library regions in the buffer, sorted by start offset.
    ///
    /// Overlapping candidates are resolved by confidence, then match length,
    /// then declaration order; the loser is dropped.
    pub fn find(&self, buffer: &SourceBuffer) -> Vec<LibraryMatch> {
        let text = buffer.as_str();
        let mut hits: BTreeMap<usize, Vec<(ByteRange, usize)>> = BTreeMap::new();

        for set_index in self.set.matches(text).into_iter() {
            let (owner, pattern_index) = self.owners[set_index];
            let regex = &self.signatures[owner].patterns[pattern_index];
            let entry = hits.entry(owner).or_default();
            entry.extend(
                regex
                    .find_iter(text)
                    .filter(|m| !m.range().is_empty())
                    .map(|m| (ByteRange::new(m.start(), m.end()), pattern_index)),
            );
        }

        let mut candidates = Vec::new();
        for (owner, mut owner_hits) in hits {
            owner_hits.sort_by_key(|(range, pattern)| (range.start, range.end, *pattern));
            for cluster in cluster_hits(&owner_hits, self.cluster_gap) {
                candidates.push(self.candidate(buffer, owner, cluster));
            }
        }

        let resolved = resolve_overlaps(candidates);
        tracing::debug!("Resolved {} library regions", resolved.len());
        resolved
    }

    fn candidate(
        &self,
        buffer: &SourceBuffer,
        owner: usize,
        cluster: &[(ByteRange, usize)],
    ) -> LibraryMatch {
        let compiled = &self.signatures[owner];
        let signature = &compiled.signature;

        let start = cluster.iter().map(|(r, _)| r.start).min().unwrap_or(0);
        let end = cluster.iter().map(|(r, _)| r.end).max().unwrap_or(start);
        let range = ByteRange::new(start, end);

        let mut distinct: Vec<usize> = cluster.iter().map(|(_, p)| *p).collect();
        distinct.sort_unstable();
        distinct.dedup();
        let coverage = distinct.len() as f64 / compiled.patterns.len() as f64;
        let confidence = signature.confidence * (0.5 + 0.5 * coverage);

        let informational = confidence < self.min_confidence;
        LibraryMatch {
            name: signature.name.clone(),
            version: self.extract_version(buffer, compiled, range),
            confidence,
            byte_range: range,
            should_filter: signature.should_filter && !informational,
            informational,
            signature_index: owner,
        }
    }

    fn extract_version(
        &self,
        buffer: &SourceBuffer,
        compiled: &CompiledSignature,
        range: ByteRange,
    ) -> Option<String> {
        let regex = compiled.version.as_ref()?;
        let start = buffer.floor_char_boundary(range.start.saturating_sub(self.version_window));
        let end = buffer.ceil_char_boundary(range.end.saturating_add(self.version_window));
        let haystack = buffer.slice(ByteRange::new(start, end));
        let captures = regex.captures(haystack)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
    }
}

/// Convenience wrapper: compile `signatures` and match them against `buffer`.
pub fn match_libraries(
    buffer: &SourceBuffer,
    signatures: &[LibrarySignature],
    config: &LibraryConfig,
) -> AppResult<Vec<LibraryMatch>> {
    Ok(LibraryMatcher::new(signatures, config)?.find(buffer))
}

fn compile(signature: &str, source: &str) -> AppResult<Regex> {
    Regex::new(source)
        .map_err(|e| AppError::Rules(format!("signature '{}': invalid pattern: {}", signature, e)))
}

/// Split sorted hits into clusters whose gaps are at most `gap` bytes.
fn cluster_hits(hits: &[(ByteRange, usize)], gap: usize) -> Vec<&[(ByteRange, usize)]> {
    let mut clusters = Vec::new();
    let mut begin = 0;
    let mut reach: usize = 0;
    for (i, (range, _)) in hits.iter().enumerate() {
        if i > begin && range.start > reach.saturating_add(gap) {
            clusters.push(&hits[begin..i]);
            begin = i;
        }
        reach = if i == begin { range.end } else { reach.max(range.end) };
    }
    if begin < hits.len() {
        clusters.push(&hits[begin..]);
    }
    clusters
}

fn resolve_overlaps(mut candidates: Vec<LibraryMatch>) -> Vec<LibraryMatch> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.byte_range.len().cmp(&a.byte_range.len()))
            .then_with(|| a.signature_index.cmp(&b.signature_index))
            .then_with(|| a.byte_range.start.cmp(&b.byte_range.start))
    });

    let mut kept: Vec<LibraryMatch> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| !k.byte_range.overlaps(&candidate.byte_range))
        {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|m| (m.byte_range.start, m.byte_range.end));
    kept
}

/// Aggregate matches per library name, sorted by name.
pub fn detected_libraries(matches: &[LibraryMatch]) -> Vec<DetectedLibrary> {
    let mut by_name: BTreeMap<&str, DetectedLibrary> = BTreeMap::new();
    for m in matches {
        let entry = by_name.entry(&m.name).or_insert_with(|| DetectedLibrary {
            name: m.name.clone(),
            version: None,
            confidence: 0.0,
            should_filter: false,
            informational: true,
            matches: 0,
            bytes: 0,
        });
        entry.matches += 1;
        entry.bytes += m.byte_range.len();
        entry.confidence = entry.confidence.max(m.confidence);
        entry.should_filter |= m.should_filter;
        entry.informational &= m.informational;
        if entry.version.is_none() {
            entry.version = m.version.clone();
        }
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(name: &str, patterns: Vec<SignaturePattern>, confidence: f64) -> LibrarySignature {
        LibrarySignature {
            name: name.to_string(),
            patterns,
            version_pattern: None,
            confidence,
            should_filter: true,
        }
    }

    #[test]
    fn test_literal_match_with_version() {
        let buffer = SourceBuffer::new("/*! lodash v4.17.21 */ var _=function(){};_.VERSION='4.17.21';");
        let mut sig = signature(
            "lodash",
            vec![SignaturePattern::literal("lodash"), SignaturePattern::regex(r"_\.VERSION")],
            0.9,
        );
        sig.version_pattern = Some(r"v(\d+\.\d+\.\d+)".to_string());

        let matches = match_libraries(&buffer, &[sig], &LibraryConfig::default()).unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.name, "lodash");
        assert_eq!(m.version.as_deref(), Some("4.17.21"));
        assert!((m.confidence - 0.9).abs() < 1e-9);
        assert!(m.should_filter);
        assert!(!m.informational);
        assert_eq!(m.byte_range.start, 4);
    }

    #[test]
    fn test_partial_coverage_is_informational() {
        let buffer = SourceBuffer::new("var x = 'jQuery';");
        let sig = signature(
            "jquery",
            vec![
                SignaturePattern::literal("jQuery"),
                SignaturePattern::literal("jquery.fn"),
            ],
            0.9,
        );
        let matches = match_libraries(&buffer, &[sig], &LibraryConfig::default()).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].informational);
        assert!(!matches[0].should_filter);
    }

    #[test]
    fn test_overlap_resolution_prefers_confidence_then_length_then_order() {
        let buffer = SourceBuffer::new("__webpack_require__.r(exports)");
        let low = signature("low", vec![SignaturePattern::literal("__webpack_require__")], 0.8);
        let high = signature("high", vec![SignaturePattern::literal("webpack_require")], 0.95);
        let matches =
            match_libraries(&buffer, &[low.clone(), high], &LibraryConfig::default()).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "high");

        let longer = signature("longer", vec![SignaturePattern::literal("__webpack_require__.r")], 0.8);
        let matches =
            match_libraries(&buffer, &[low.clone(), longer], &LibraryConfig::default()).unwrap();
        assert_eq!(matches[0].name, "longer");

        let twin = signature("twin", vec![SignaturePattern::literal("__webpack_require__")], 0.8);
        let matches = match_libraries(&buffer, &[low, twin], &LibraryConfig::default()).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "low");
    }

    #[test]
    fn test_distant_hits_form_separate_regions() {
        let config = LibraryConfig {
            min_confidence: 0.5,
            version_window: 8,
            cluster_gap: 8,
        };
        let text = format!("React.x;{}React.y;", " ".repeat(64));
        let buffer = SourceBuffer::new(text);
        let sig = signature("react", vec![SignaturePattern::literal("React.")], 0.9);
        let matches = match_libraries(&buffer, &[sig], &config).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].byte_range.end <= matches[1].byte_range.start);

        let detected = detected_libraries(&matches);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].matches, 2);
    }

    #[test]
    fn test_cluster_gap_independent_of_version_window() {
        let text = format!("/*! v9.9.9 */{}React.x;{}React.y;", " ".repeat(40), " ".repeat(64));
        let buffer = SourceBuffer::new(text);
        let mut sig = signature("react", vec![SignaturePattern::literal("React.")], 0.9);
        sig.version_pattern = Some(r"v(\d+\.\d+\.\d+)".into());

        let narrow = LibraryConfig {
            min_confidence: 0.5,
            version_window: 8,
            cluster_gap: 128,
        };
        let matches = match_libraries(&buffer, &[sig.clone()], &narrow).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].version, None);

        let wide = LibraryConfig {
            version_window: 128,
            ..narrow
        };
        let matches = match_libraries(&buffer, &[sig], &wide).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].version.as_deref(), Some("9.9.9"));
    }

    #[test]
    fn test_invalid_pattern_is_rules_error() {
        let sig = signature("broken", vec![SignaturePattern::regex("(unclosed")], 0.9);
        let err = LibraryMatcher::new(&[sig], &LibraryConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Rules(_)));

        let empty = signature("empty", vec![SignaturePattern::default()], 0.9);
        assert!(LibraryMatcher::new(&[empty], &LibraryConfig::default()).is_err());
    }

    #[test]
    fn test_no_signatures_matches_nothing() {
        let buffer = SourceBuffer::new("anything at all");
        assert!(match_libraries(&buffer, &[], &LibraryConfig::default())
            .unwrap()
            .is_empty());
    }
}
