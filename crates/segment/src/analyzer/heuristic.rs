//! Local analyzer reporting security-pattern hits.

use super::{AnalyzerError, ChunkAnalyzer, ChunkFinding, ChunkRequest};
use crate::rules::{SecurityMatcher, SecurityPattern};
use async_trait::async_trait;
use bundlescope_core::AppResult;

/// Reports every security-pattern hit in the request text as a finding.
///
/// Needs no network and never fails, which makes it the default analyzer and
/// a baseline for comparing model output.
#[derive(Debug)]
pub struct HeuristicAnalyzer {
    matcher: SecurityMatcher,
}

impl HeuristicAnalyzer {
    pub fn new(patterns: &[SecurityPattern]) -> AppResult<Self> {
        Ok(Self {
            matcher: SecurityMatcher::new(patterns)?,
        })
    }
}

#[async_trait]
impl ChunkAnalyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(&self, request: &ChunkRequest<'_>) -> Result<Vec<ChunkFinding>, AnalyzerError> {
        let findings = self
            .matcher
            .hits(request.text)
            .into_iter()
            .map(|hit| {
                let pattern = self.matcher.pattern(hit.pattern);
                ChunkFinding {
                    category: pattern.category.clone(),
                    severity: pattern.severity,
                    confidence: pattern.confidence,
                    offset: Some(hit.range.start),
                    line: None,
                    description: pattern.description.clone(),
                    recommendation: pattern.recommendation.clone(),
                }
            })
            .collect::<Vec<_>>();

        tracing::trace!(
            chunk = %request.chunk.id,
            findings = findings.len(),
            "Heuristic analysis complete"
        );
        Ok(findings)
    }
}
