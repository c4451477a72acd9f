//! Command handlers for the bundlescope CLI.
//!
//! This module organizes all CLI commands into separate submodules, plus the
//! options and loading steps `analyze` and `chunks` share.

pub mod analyze;
pub mod chunks;
pub mod rules;

// Re-export command types for convenience
pub use analyze::AnalyzeCommand;
pub use chunks::ChunksCommand;
pub use rules::RulesCommand;

use bundlescope_core::{config::AppConfig, AnalysisConfig, AppError, AppResult, Focus};
use bundlescope_segment::{CompiledRules, ProgressReporter, RuleSet, SourceBuffer};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chunking and scoring options shared by `analyze` and `chunks`.
#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Maximum estimated tokens per chunk
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Tokens of trailing context repeated at the start of each chunk
    #[arg(long)]
    pub overlap_tokens: Option<usize>,

    /// Split oversized function and class bodies at statement level
    #[arg(long)]
    pub force_split: bool,

    /// Never descend into oversized wrapper scopes
    #[arg(long)]
    pub preserve_scopes: bool,

    /// Characters per estimated token
    #[arg(long)]
    pub chars_per_token: Option<usize>,

    /// Scoring focus (security, general)
    #[arg(long, value_parser = parse_focus)]
    pub focus: Option<Focus>,

    /// Rule table (YAML) replacing the bundled default
    #[arg(long)]
    pub rules: Option<PathBuf>,
}

impl TuningArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut AnalysisConfig) {
        let chunking = &mut config.chunking;
        if let Some(max_tokens) = self.max_tokens {
            chunking.max_tokens = max_tokens;
        }
        if let Some(overlap_tokens) = self.overlap_tokens {
            chunking.overlap_tokens = overlap_tokens;
        }
        if let Some(chars_per_token) = self.chars_per_token {
            chunking.chars_per_token = chars_per_token;
        }
        if self.force_split {
            chunking.force_split_oversized = true;
        }
        if self.preserve_scopes {
            chunking.preserve_scopes = true;
        }
        if let Some(focus) = self.focus {
            config.scoring.focus = focus;
        }
        if let Some(rules) = &self.rules {
            config.rules_file = Some(rules.clone());
        }
    }
}

fn parse_focus(value: &str) -> Result<Focus, String> {
    Focus::parse(value).ok_or_else(|| format!("unknown focus '{}' (security, general)", value))
}

/// Analysis configuration with CLI flags applied, validated.
pub fn analysis_config(config: &AppConfig, tuning: &TuningArgs) -> AppResult<AnalysisConfig> {
    let mut analysis = config.analysis.clone();
    tuning.apply(&mut analysis);
    analysis.validate()?;
    Ok(analysis)
}

/// Load the configured rule table, or the bundled default.
pub fn load_rules(analysis: &AnalysisConfig) -> AppResult<RuleSet> {
    match &analysis.rules_file {
        Some(path) => RuleSet::load(path),
        None => RuleSet::from_yaml_str(rules::DEFAULT_RULES),
    }
}

pub fn compile_rules(analysis: &AnalysisConfig) -> AppResult<(RuleSet, CompiledRules)> {
    let rules = load_rules(analysis)?;
    let compiled = rules.compile(&analysis.library)?;
    tracing::debug!(
        "Rule table: {} security patterns, {} library signatures",
        rules.security_patterns.len(),
        rules.library_signatures.len()
    );
    Ok((rules, compiled))
}

/// Read the input bundle; relative paths resolve against the workspace.
pub fn load_source(config: &AppConfig, file: &Path) -> AppResult<SourceBuffer> {
    let path = if file.is_relative() {
        config.workspace.join(file)
    } else {
        file.to_path_buf()
    };
    let buffer = SourceBuffer::from_path(&path)?;
    tracing::info!(
        "Loaded {:?}: {} bytes, {} lines",
        path,
        buffer.len(),
        buffer.line_count()
    );
    Ok(buffer)
}

/// Progress printed to stderr, or nothing.
pub fn progress_reporter(enabled: bool) -> ProgressReporter {
    if enabled {
        ProgressReporter::new(Arc::new(|event| eprintln!("{}", event.format_simple())))
    } else {
        ProgressReporter::noop()
    }
}

pub fn to_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Serialization(e.to_string()))
}
