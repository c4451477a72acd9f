//! Rule tables: security patterns and library signatures.
//!
//! Rules are data loaded from YAML. Nothing here knows specific library or
//! vulnerability names.

use crate::library::{LibraryMatcher, LibrarySignature};
use crate::types::Severity;
use bundlescope_core::{AppError, AppResult, LibraryConfig};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// A security-relevant code pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPattern {
    pub name: String,
    pub category: String,
    pub pattern: String,
    pub severity: Severity,
    /// Contribution of one hit to a chunk's pattern density
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Confidence assigned to findings reported from a bare hit
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_confidence() -> f64 {
    0.6
}

/// Rule file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    pub security_patterns: Vec<SecurityPattern>,
    pub library_signatures: Vec<LibrarySignature>,
}

impl RuleSet {
    /// Parse a YAML rule table.
    pub fn from_yaml_str(contents: &str) -> AppResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AppError::Rules(format!("Failed to parse rule table: {}", e)))
    }

    /// Load a YAML rule table from disk.
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Rules(format!("Failed to read rule table {:?}: {}", path, e))
        })?;
        let rules = Self::from_yaml_str(&contents)?;
        tracing::debug!(
            "Loaded {} security patterns and {} library signatures from {:?}",
            rules.security_patterns.len(),
            rules.library_signatures.len(),
            path
        );
        Ok(rules)
    }

    /// Compile every pattern. Invalid regexes are reported before any
    /// processing starts.
    pub fn compile(&self, library: &LibraryConfig) -> AppResult<CompiledRules> {
        Ok(CompiledRules {
            security: SecurityMatcher::new(&self.security_patterns)?,
            libraries: LibraryMatcher::new(&self.library_signatures, library)?,
        })
    }
}

/// Rules ready for matching.
#[derive(Debug)]
pub struct CompiledRules {
    pub security: SecurityMatcher,
    pub libraries: LibraryMatcher,
}

/// One security pattern hit, relative to the searched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternHit {
    pub pattern: usize,
    pub range: Range<usize>,
}

/// Compiled security patterns.
#[derive(Debug)]
pub struct SecurityMatcher {
    patterns: Vec<SecurityPattern>,
    regexes: Vec<Regex>,
    set: RegexSet,
}

impl SecurityMatcher {
    pub fn new(patterns: &[SecurityPattern]) -> AppResult<Self> {
        let mut regexes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if pattern.name.trim().is_empty() || pattern.pattern.is_empty() {
                return Err(AppError::Rules(
                    "security patterns need a name and a pattern".into(),
                ));
            }
            if !pattern.weight.is_finite() || pattern.weight < 0.0 {
                return Err(AppError::Rules(format!(
                    "security pattern '{}': weight must be non-negative",
                    pattern.name
                )));
            }
            if !(0.0..=1.0).contains(&pattern.confidence) {
                return Err(AppError::Rules(format!(
                    "security pattern '{}': confidence must be within [0, 1]",
                    pattern.name
                )));
            }
            let regex = Regex::new(&pattern.pattern).map_err(|e| {
                AppError::Rules(format!(
                    "security pattern '{}': invalid regex: {}",
                    pattern.name, e
                ))
            })?;
            regexes.push(regex);
        }

        let set = RegexSet::new(patterns.iter().map(|p| p.pattern.as_str()))
            .map_err(|e| AppError::Rules(format!("security pattern set: {}", e)))?;

        Ok(Self {
            patterns: patterns.to_vec(),
            regexes,
            set,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn pattern(&self, index: usize) -> &SecurityPattern {
        &self.patterns[index]
    }

    /// All non-empty hits in `text`, ordered by start then pattern index.
    pub fn hits(&self, text: &str) -> Vec<PatternHit> {
        let mut hits: Vec<PatternHit> = self
            .set
            .matches(text)
            .into_iter()
            .flat_map(|index| {
                self.regexes[index]
                    .find_iter(text)
                    .filter(|m| !m.range().is_empty())
                    .map(move |m| PatternHit {
                        pattern: index,
                        range: m.range(),
                    })
            })
            .collect();
        hits.sort_by_key(|hit| (hit.range.start, hit.pattern));
        hits
    }

    /// Sum of pattern weights over all hits in `text`.
    pub fn weighted_hits(&self, text: &str) -> f64 {
        self.hits(text)
            .iter()
            .map(|hit| self.patterns[hit.pattern].weight)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RULES: &str = r#"
securityPatterns:
  - name: eval
    category: code-injection
    pattern: '\beval\s*\('
    severity: high
    weight: 2.0
    description: Dynamic code evaluation
    recommendation: Avoid eval
  - name: inner-html
    category: xss
    pattern: '\.innerHTML\s*='
    severity: medium
    description: Direct HTML injection
librarySignatures:
  - name: react
    patterns:
      - literal: react.production.min.js
      - regex: 'React\.createElement'
    versionPattern: 'React v(\d+\.\d+\.\d+)'
    confidence: 0.9
"#;

    #[test]
    fn test_parse_rule_table() {
        let rules = RuleSet::from_yaml_str(RULES).unwrap();
        assert_eq!(rules.security_patterns.len(), 2);
        assert_eq!(rules.security_patterns[0].severity, Severity::High);
        assert_eq!(rules.security_patterns[1].weight, 1.0);
        assert_eq!(rules.security_patterns[1].confidence, 0.6);
        assert_eq!(rules.library_signatures[0].patterns.len(), 2);
        assert!(rules.library_signatures[0].should_filter);
        assert!(rules.compile(&LibraryConfig::default()).is_ok());
    }

    #[test]
    fn test_hits_are_ordered_and_weighted() {
        let rules = RuleSet::from_yaml_str(RULES).unwrap();
        let matcher = SecurityMatcher::new(&rules.security_patterns).unwrap();
        let text = "a.innerHTML = eval(x); eval (y)";
        let hits = matcher.hits(text);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].pattern, 1);
        assert_eq!(hits[1].pattern, 0);
        assert_eq!(hits[1].range.start, 14);
        assert!((matcher.weighted_hits(text) - 5.0).abs() < 1e-9);
        assert!(matcher.hits("return 1").is_empty());
    }

    #[test]
    fn test_invalid_regex_is_rules_error() {
        let yaml = r#"
securityPatterns:
  - name: broken
    category: x
    pattern: '(unclosed'
    severity: low
    description: broken
"#;
        let rules = RuleSet::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            rules.compile(&LibraryConfig::default()),
            Err(AppError::Rules(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rules.yaml");
        std::fs::write(&path, RULES).unwrap();
        let rules = RuleSet::load(&path).unwrap();
        assert_eq!(rules.library_signatures[0].name, "react");

        let missing = RuleSet::load(&temp.path().join("missing.yaml"));
        assert!(matches!(missing, Err(AppError::Rules(_))));
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let yaml = r#"
securityPatterns:
  - name: x
    category: x
    pattern: x
    severity: apocalyptic
    description: x
"#;
        assert!(RuleSet::from_yaml_str(yaml).is_err());
    }
}
