//! Cross-module tests over the whole pipeline.

mod properties;

use crate::library::{LibrarySignature, SignaturePattern};
use crate::rules::{CompiledRules, RuleSet, SecurityPattern};
use crate::types::Severity;
use bundlescope_core::{AnalysisConfig, BackoffConfig, ChunkingConfig, OrchestratorConfig};

/// One security pattern (`eval`) and one two-pattern library signature.
fn rule_set() -> RuleSet {
    RuleSet {
        security_patterns: vec![SecurityPattern {
            name: "eval".into(),
            category: "code-injection".into(),
            pattern: r"\beval\s*\(".into(),
            severity: Severity::High,
            weight: 1.0,
            confidence: 0.7,
            description: "Dynamic code evaluation".into(),
            recommendation: Some("Avoid eval on untrusted input".into()),
        }],
        library_signatures: vec![LibrarySignature {
            name: "testlib".into(),
            patterns: vec![
                SignaturePattern::literal("LIBSTART"),
                SignaturePattern::literal("LIBEND"),
            ],
            version_pattern: None,
            confidence: 0.9,
            should_filter: true,
        }],
    }
}

fn compiled_rules() -> CompiledRules {
    let config = AnalysisConfig::default();
    rule_set().compile(&config.library).unwrap()
}

fn config(max_tokens: usize, overlap_tokens: usize) -> AnalysisConfig {
    AnalysisConfig {
        chunking: ChunkingConfig {
            max_tokens,
            overlap_tokens,
            ..ChunkingConfig::default()
        },
        orchestrator: OrchestratorConfig {
            backoff: BackoffConfig {
                initial_ms: 1,
                max_ms: 4,
                multiplier: 2.0,
            },
            ..OrchestratorConfig::default()
        },
        ..AnalysisConfig::default()
    }
}
