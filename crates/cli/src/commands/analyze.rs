//! Analyze command handler.
//!
//! Runs the full pipeline over one bundle and prints the merged report.

use super::{compile_rules, load_source, progress_reporter, to_json, TuningArgs};
use bundlescope_core::{config::AppConfig, AnalysisConfig, AppError, AppResult};
use bundlescope_llm::{create_client, ClientOptions, LlmClient};
use bundlescope_segment::{
    analyze_source, AnalysisResult, ChunkAnalyzer, HeuristicAnalyzer, LlmAnalyzer,
    LlmAnalyzerOptions, RuleSet, Severity,
};
use clap::{Args, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which analyzer examines each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalyzerKind {
    /// Local security-pattern matcher, no network
    Heuristic,
    /// The configured LLM provider
    Llm,
}

/// Analyze a bundle and print the merged report
#[derive(Args, Debug)]
pub struct AnalyzeCommand {
    /// JavaScript file to analyze
    pub file: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Analyzer backend
    #[arg(long, value_enum, default_value_t = AnalyzerKind::Heuristic)]
    pub analyzer: AnalyzerKind,

    /// Maximum analyzer calls in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Token budget for the whole run
    #[arg(long)]
    pub max_total_tokens: Option<usize>,

    /// Retries per chunk for transient failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Skip chunks scoring below this importance (0-1)
    #[arg(long)]
    pub min_importance: Option<f64>,

    /// Also analyze chunks dominated by known libraries
    #[arg(long)]
    pub include_libraries: bool,

    /// Exit with an error when a finding at or above this severity is reported
    #[arg(long, value_parser = parse_severity)]
    pub fail_on: Option<Severity>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print progress events to stderr
    #[arg(long)]
    pub progress: bool,
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    Severity::parse(value).ok_or_else(|| format!("unknown severity '{}'", value))
}

impl AnalyzeCommand {
    /// Execute the analyze command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing analyze command");
        tracing::debug!("Analyze command options: {:?}", self);

        // Everything fatal is checked before the first chunk is dispatched
        let analysis = self.analysis_config(config)?;
        let (rules, compiled) = compile_rules(&analysis)?;
        let analyzer = self.create_analyzer(config, &analysis, &rules)?;
        let buffer = load_source(config, &self.file)?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; waiting for in-flight chunks");
                interrupt.cancel();
            }
        });

        let result = analyze_source(
            &buffer,
            &compiled,
            &analysis,
            analyzer,
            &cancel,
            &progress_reporter(self.progress),
        )
        .await?;

        let report = if self.json {
            to_json(&result)?
        } else {
            render_text(&result)
        };
        match &self.output {
            Some(path) => {
                std::fs::write(path, report)?;
                tracing::info!("Report written to {:?}", path);
            }
            None => println!("{}", report),
        }

        if let Some(threshold) = self.fail_on {
            let hits = result
                .findings
                .iter()
                .filter(|f| f.severity >= threshold)
                .count();
            if hits > 0 {
                return Err(AppError::Analysis(format!(
                    "{} findings at or above {} severity",
                    hits, threshold
                )));
            }
        }
        Ok(())
    }

    fn analysis_config(&self, config: &AppConfig) -> AppResult<AnalysisConfig> {
        let mut analysis = config.analysis.clone();
        self.tuning.apply(&mut analysis);

        let orchestrator = &mut analysis.orchestrator;
        if let Some(concurrency) = self.concurrency {
            orchestrator.concurrency = concurrency;
        }
        if let Some(max_total_tokens) = self.max_total_tokens {
            orchestrator.max_total_tokens = max_total_tokens;
        }
        if let Some(retries) = self.retries {
            orchestrator.retries = retries;
        }
        if let Some(min_importance) = self.min_importance {
            orchestrator.min_importance = min_importance;
        }
        if self.include_libraries {
            orchestrator.skip_library_chunks = false;
        }

        analysis.validate()?;
        Ok(analysis)
    }

    fn create_analyzer(
        &self,
        config: &AppConfig,
        analysis: &AnalysisConfig,
        rules: &RuleSet,
    ) -> AppResult<Arc<dyn ChunkAnalyzer>> {
        match self.analyzer {
            AnalyzerKind::Heuristic => {
                Ok(Arc::new(HeuristicAnalyzer::new(&rules.security_patterns)?))
            }
            AnalyzerKind::Llm => {
                config.validate()?;
                let api_key = config.resolve_api_key();
                let client = create_client(
                    &config.llm.provider,
                    ClientOptions {
                        endpoint: config.llm.endpoint.as_deref(),
                        api_key: api_key.as_deref(),
                        timeout_secs: config.llm.timeout_secs,
                    },
                )?;
                tracing::info!(
                    "Using {} model {}",
                    client.provider_name(),
                    config.llm.model
                );
                Ok(Arc::new(LlmAnalyzer::new(
                    client,
                    LlmAnalyzerOptions {
                        model: config.llm.model.clone(),
                        max_output_tokens: config.llm.max_output_tokens,
                        temperature: config.llm.temperature,
                        focus: analysis.scoring.focus,
                    },
                )))
            }
        }
    }
}

/// Plain-text rendering of a result.
pub fn render_text(result: &AnalysisResult) -> String {
    let metrics = &result.metrics;
    let summary = &result.summary;
    let mut out = String::new();

    let _ = writeln!(out, "Analyzer:  {}", result.analyzer);
    let _ = writeln!(
        out,
        "Input:     {} bytes, {} lines (revision {})",
        metrics.total_bytes, metrics.total_lines, metrics.revision
    );
    let _ = writeln!(
        out,
        "Chunks:    {} total, {} analyzed, {} failed, {} skipped",
        metrics.chunks_total, metrics.chunks_analyzed, metrics.chunks_failed, metrics.chunks_skipped
    );
    let _ = writeln!(
        out,
        "Tokens:    {} (+{} context)",
        metrics.tokens_spent, metrics.context_tokens_spent
    );
    let _ = writeln!(
        out,
        "Libraries: {} detected, {:.1}% of code filtered",
        summary.libraries_detected, summary.code_reduction
    );
    for library in result.libraries.iter().filter(|l| !l.informational) {
        let _ = writeln!(
            out,
            "  - {} {} ({} bytes)",
            library.name,
            library.version.as_deref().unwrap_or("?"),
            library.bytes
        );
    }

    let counts: Vec<String> = Severity::ALL
        .iter()
        .map(|s| format!("{} {}", summary.by_severity.get(s).copied().unwrap_or(0), s))
        .collect();
    let _ = writeln!(
        out,
        "Findings:  {} ({})",
        summary.total_findings,
        counts.join(", ")
    );

    for note in &result.notes {
        let _ = writeln!(out, "Note: {}", note);
    }

    for finding in &result.findings {
        let _ = writeln!(
            out,
            "\n[{}] {} at {}:{} (offset {})",
            finding.severity.as_str().to_uppercase(),
            finding.category,
            finding.location.line,
            finding.location.column,
            finding.location.offset
        );
        let _ = writeln!(out, "  {}", finding.description);
        if let Some(recommendation) = &finding.recommendation {
            let _ = writeln!(out, "  Fix: {}", recommendation);
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::rules::DEFAULT_RULES;
    use bundlescope_segment::{ProgressReporter, SourceBuffer};

    #[tokio::test]
    async fn test_render_text_lists_findings() {
        let analysis = AnalysisConfig::default();
        let rules = RuleSet::from_yaml_str(DEFAULT_RULES).unwrap();
        let compiled = rules.compile(&analysis.library).unwrap();
        let buffer = SourceBuffer::new("function run(x){return eval(x)}");

        let result = analyze_source(
            &buffer,
            &compiled,
            &analysis,
            Arc::new(HeuristicAnalyzer::new(&rules.security_patterns).unwrap()),
            &CancellationToken::new(),
            &ProgressReporter::noop(),
        )
        .await
        .unwrap();

        let text = render_text(&result);
        assert!(text.contains("Analyzer:  heuristic"));
        assert!(text.contains("Chunks:    1 total, 1 analyzed"));
        assert!(text.contains("eval"));
        assert!(text.contains("at 1:24"));
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!(parse_severity("high"), Ok(Severity::High));
        assert!(parse_severity("urgent").is_err());
    }
}
