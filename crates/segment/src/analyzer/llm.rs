//! Analyzer backed by an `LlmClient`.

use super::{AnalyzerError, ChunkAnalyzer, ChunkFinding, ChunkRequest};
use crate::types::Severity;
use async_trait::async_trait;
use bundlescope_core::Focus;
use bundlescope_llm::{LlmClient, LlmError, LlmRequest};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You review fragments of minified JavaScript. \
Reply with JSON only: an object {\"findings\": [...]} where each finding has \
category, severity (low|medium|high|critical), confidence (0-1), offset (byte \
offset into the fragment, if known), line (1-based line in the fragment, if \
known), description and an optional recommendation. Reply {\"findings\": []} \
when nothing is worth reporting.";

/// Settings for `LlmAnalyzer`.
#[derive(Debug, Clone)]
pub struct LlmAnalyzerOptions {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    pub focus: Focus,
}

/// Analyzer that prompts a language model once per chunk.
pub struct LlmAnalyzer {
    client: Arc<dyn LlmClient>,
    options: LlmAnalyzerOptions,
    name: String,
}

impl LlmAnalyzer {
    pub fn new(client: Arc<dyn LlmClient>, options: LlmAnalyzerOptions) -> Self {
        let name = format!("llm:{}/{}", client.provider_name(), options.model);
        Self {
            client,
            options,
            name,
        }
    }

    fn build_request(&self, request: &ChunkRequest<'_>) -> LlmRequest {
        let focus = match self.options.focus {
            Focus::Security => "security vulnerabilities and unsafe data flows",
            Focus::General => "notable application logic, integrations and risks",
        };
        let context_len = request.context_len();
        let prompt = format!(
            "Focus: {focus}.\n\
             Fragment kind: {kind}. The first {context_len} bytes repeat the end of the \
             previous fragment for context; do not report findings located only there.\n\
             --- fragment ---\n{text}\n--- end ---",
            focus = focus,
            kind = request.chunk.kind,
            context_len = context_len,
            text = request.text,
        );

        let mut llm_request = LlmRequest::new(prompt, &self.options.model)
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.options.max_output_tokens)
            .with_json_output();
        if let Some(temperature) = self.options.temperature {
            llm_request = llm_request.with_temperature(temperature);
        }
        llm_request
    }
}

#[async_trait]
impl ChunkAnalyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, request: &ChunkRequest<'_>) -> Result<Vec<ChunkFinding>, AnalyzerError> {
        let llm_request = self.build_request(request);
        let response = self
            .client
            .complete(&llm_request)
            .await
            .map_err(classify_llm_error)?;

        if !response.done {
            tracing::warn!(chunk = %request.chunk.id, "Model output was truncated");
        }
        tracing::debug!(
            chunk = %request.chunk.id,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "Model responded"
        );

        parse_findings(&response.content)
    }
}

/// Map a provider error onto the orchestrator's retry classes.
pub(crate) fn classify_llm_error(err: LlmError) -> AnalyzerError {
    let message = err.to_string();
    match &err {
        _ if err.is_auth() => AnalyzerError::Unauthorized(message),
        LlmError::Status {
            status: 429,
            retry_after,
            ..
        } => AnalyzerError::RateLimited {
            message,
            retry_after: *retry_after,
        },
        LlmError::Timeout(_) => AnalyzerError::Timeout(message),
        LlmError::Decode(_) => AnalyzerError::InvalidResponse(message),
        LlmError::Config(_) => AnalyzerError::Rejected(message),
        _ if err.is_transient() => AnalyzerError::Unavailable(message),
        _ => AnalyzerError::Rejected(message),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
}

/// Extract findings from model output.
///
/// Accepts `{"findings": [...]}`, a bare array, or either wrapped in prose.
/// Entries without a description are dropped; an unreadable payload is an
/// `InvalidResponse`.
pub(crate) fn parse_findings(content: &str) -> Result<Vec<ChunkFinding>, AnalyzerError> {
    let value = serde_json::from_str::<Value>(content.trim())
        .ok()
        .or_else(|| embedded_json(content))
        .ok_or_else(|| {
            AnalyzerError::InvalidResponse(format!(
                "no JSON findings in response ({} bytes)",
                content.len()
            ))
        })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("findings") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AnalyzerError::InvalidResponse(
                    "response object has no findings array".into(),
                ))
            }
        },
        _ => {
            return Err(AnalyzerError::InvalidResponse(
                "response is not an object or array".into(),
            ))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawFinding>(item).ok())
        .filter_map(|raw| {
            let description = raw.description.filter(|d| !d.trim().is_empty())?;
            Some(ChunkFinding {
                category: raw
                    .category
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "general".to_string()),
                severity: raw
                    .severity
                    .as_deref()
                    .and_then(Severity::parse)
                    .unwrap_or(Severity::Medium),
                confidence: raw
                    .confidence
                    .filter(|c| c.is_finite())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
                offset: raw.offset,
                line: raw.line,
                description,
                recommendation: raw.recommendation,
            })
        })
        .collect())
}

fn embedded_json(content: &str) -> Option<Value> {
    let mut delimiters: Vec<(usize, char, char)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| content.find(open).map(|start| (start, open, close)))
        .collect();
    delimiters.sort_unstable();

    delimiters.into_iter().find_map(|(start, _, close)| {
        let end = content.rfind(close)?;
        if start < end {
            serde_json::from_str(&content[start..=end]).ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkKind};
    use crate::source::ByteRange;
    use bundlescope_llm::{LlmResponse, LlmResult, LlmUsage};
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedClient {
        replies: Mutex<Vec<LlmResult<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let reply = self.replies.lock().unwrap().remove(0)?;
            Ok(LlmResponse {
                content: reply,
                model: request.model.clone(),
                usage: LlmUsage::new(10, 5),
                done: true,
            })
        }
    }

    fn chunk() -> Chunk {
        Chunk {
            id: "c1".into(),
            index: 0,
            byte_range: ByteRange::new(4, 20),
            context_start: 0,
            primary_tokens: 4,
            context_tokens: 1,
            estimated_tokens: 5,
            kind: ChunkKind::Function,
            oversized: false,
            importance: 0.9,
            dependencies: BTreeSet::new(),
            library: None,
        }
    }

    fn options() -> LlmAnalyzerOptions {
        LlmAnalyzerOptions {
            model: "test-model".into(),
            max_output_tokens: 256,
            temperature: Some(0.0),
            focus: Focus::Security,
        }
    }

    #[test]
    fn test_parse_object_and_array() {
        let findings = parse_findings(
            r#"{"findings":[{"category":"xss","severity":"HIGH","confidence":1.4,"offset":3,"description":"innerHTML sink"}]}"#,
        )
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].confidence, 1.0);

        let findings =
            parse_findings(r#"Here you go: [{"description":"x","severity":"bogus"}] done"#).unwrap();
        assert_eq!(findings[0].category, "general");
        assert_eq!(findings[0].severity, Severity::Medium);

        assert!(parse_findings(r#"{"findings":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_findings("I could not analyze this").unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidResponse(_)));
        assert!(parse_findings(r#"{"other":1}"#).is_err());
    }

    #[test]
    fn test_llm_error_classification() {
        let unauthorized = classify_llm_error(LlmError::from_status(401, "no".into(), None));
        assert!(matches!(unauthorized, AnalyzerError::Unauthorized(_)));

        let limited = classify_llm_error(LlmError::from_status(429, "slow".into(), Some("3")));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let server = classify_llm_error(LlmError::from_status(502, "bad gateway".into(), None));
        assert!(matches!(server, AnalyzerError::Unavailable(_)));

        let too_large = classify_llm_error(LlmError::from_status(413, "too large".into(), None));
        assert!(matches!(too_large, AnalyzerError::Rejected(_)));
        assert!(!too_large.is_transient());

        let timeout = classify_llm_error(LlmError::Timeout("120s".into()));
        assert!(timeout.is_transient());
    }

    #[tokio::test]
    async fn test_analyze_round_trip() {
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(vec![Ok(
                r#"{"findings":[{"category":"code-injection","severity":"critical","confidence":0.9,"line":1,"description":"eval of input"}]}"#
                    .to_string(),
            )]),
            prompts: Mutex::new(Vec::new()),
        });
        let analyzer = LlmAnalyzer::new(client.clone(), options());
        assert_eq!(analyzer.name(), "llm:scripted/test-model");

        let chunk = chunk();
        let request = ChunkRequest {
            chunk: &chunk,
            text: "abcdfunction(){eval(x)}",
            text_offset: 0,
        };
        let findings = analyzer.analyze(&request).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("first 4 bytes"));
        assert!(prompts[0].contains("eval(x)"));
    }

    #[tokio::test]
    async fn test_analyze_maps_provider_failure() {
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(vec![Err(LlmError::from_status(403, "forbidden".into(), None))]),
            prompts: Mutex::new(Vec::new()),
        });
        let analyzer = LlmAnalyzer::new(client, options());
        let chunk = chunk();
        let request = ChunkRequest {
            chunk: &chunk,
            text: "abcd",
            text_offset: 0,
        };
        let err = analyzer.analyze(&request).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Unauthorized(_)));
    }
}
