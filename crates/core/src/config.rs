//! Configuration management for the bundlescope CLI.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Config file (`.bundlescope/config.yaml` or `BUNDLESCOPE_CONFIG`)
//! - Environment variables
//! - Command-line flags

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::AnalysisConfig;
use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .bundlescope/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// LLM settings used by the `llm` analyzer
    pub llm: LlmSettings,

    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Pipeline configuration
    pub analysis: AnalysisConfig,
}

/// LLM provider settings from config.yaml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// Provider name ("ollama", "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Custom endpoint URL
    pub endpoint: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Completion token cap per chunk analysis
    pub max_output_tokens: u32,

    pub temperature: Option<f32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(), // Local-first default
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: 120,
            max_output_tokens: 2048,
            temperature: Some(0.1),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    llm: Option<LlmSettings>,
    analysis: Option<AnalysisConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            llm: LlmSettings::default(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, config file and defaults.
    ///
    /// Environment variables:
    /// - `BUNDLESCOPE_WORKSPACE`: Override workspace path
    /// - `BUNDLESCOPE_CONFIG`: Path to config file
    /// - `BUNDLESCOPE_PROVIDER`: LLM provider
    /// - `BUNDLESCOPE_MODEL`: Model identifier
    /// - `BUNDLESCOPE_ENDPOINT`: Provider endpoint
    /// - `BUNDLESCOPE_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("BUNDLESCOPE_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("BUNDLESCOPE_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config.config_path();
        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        } else if config.config_file.is_some() {
            return Err(AppError::Config(format!(
                "Config file not found: {:?}",
                config_path
            )));
        }

        config.apply_env();
        Ok(config)
    }

    /// Merge an explicitly requested config file.
    ///
    /// The file `load` already read is not merged again. Environment
    /// variables keep precedence over the file either way.
    pub fn with_config_file(self, path: &Path) -> AppResult<Self> {
        if path == self.config_path() {
            return Ok(self);
        }
        let mut config = self.merge_yaml(path)?;
        config.config_file = Some(path.to_path_buf());
        config.apply_env();
        Ok(config)
    }

    /// Environment variables override YAML config.
    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("BUNDLESCOPE_PROVIDER") {
            self.llm.provider = provider;
        }

        if let Ok(model) = std::env::var("BUNDLESCOPE_MODEL") {
            self.llm.model = model;
        }

        if let Ok(endpoint) = std::env::var("BUNDLESCOPE_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }

        self.api_key = std::env::var("BUNDLESCOPE_API_KEY").ok();
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// Path of the config file this configuration reads.
    pub fn config_path(&self) -> PathBuf {
        match self.config_file {
            Some(ref cf) => cf.clone(),
            None => self.workspace.join(".bundlescope/config.yaml"),
        }
    }

    /// Merge a YAML configuration file into this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.llm = llm;
        }

        if let Some(analysis) = config_file.analysis {
            result.analysis = analysis;
        }

        // Relative rule paths are resolved against the config file's directory
        if let Some(rules) = result.analysis.rules_file.as_ref() {
            if rules.is_relative() {
                if let Some(parent) = path.parent() {
                    result.analysis.rules_file = Some(parent.join(rules));
                }
            }
        }

        tracing::debug!("Merged config file {:?}", path);
        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.llm.provider = provider;
        }

        if let Some(model) = model {
            self.llm.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Resolve the provider API key.
    ///
    /// `BUNDLESCOPE_API_KEY` wins over the provider's `apiKeyEnv`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        self.llm
            .api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok())
    }

    /// Validate configuration before any processing begins.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["ollama", "openai"];
        let provider = self.llm.provider.to_lowercase();

        if !known_providers.contains(&provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.llm.provider,
                known_providers.join(", ")
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(AppError::Config("llm.timeoutSecs must be at least 1".into()));
        }

        self.analysis.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.2");
        assert!(!config.verbose);
        assert!(!config.no_color);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path_defaults_to_workspace() {
        let config = AppConfig::default();
        assert!(config.config_path().ends_with(".bundlescope/config.yaml"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("openai".to_string()),
            Some("gpt-4o-mini".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.llm.provider, "openai");
        assert_eq!(overridden.llm.model, "gpt-4o-mini");
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.llm.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_analysis() {
        let mut config = AppConfig::default();
        config.analysis.chunking.overlap_tokens = config.analysis.chunking.max_tokens;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
llm:
  provider: openai
  model: gpt-4o-mini
  apiKeyEnv: OPENAI_API_KEY
analysis:
  chunking:
    maxTokens: 1000
    overlapTokens: 50
  scoring:
    focus: general
  rulesFile: rules.yaml
logging:
  level: warn
  color: false
"#,
        )
        .unwrap();

        let merged = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(merged.llm.provider, "openai");
        assert_eq!(merged.llm.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(merged.llm.timeout_secs, 120);
        assert_eq!(merged.analysis.chunking.max_tokens, 1000);
        assert_eq!(merged.analysis.chunking.overlap_tokens, 50);
        assert_eq!(merged.analysis.scoring.focus, crate::analysis::Focus::General);
        assert_eq!(merged.analysis.rules_file, Some(temp.path().join("rules.yaml")));
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert!(merged.no_color);
    }

    #[test]
    fn test_config_file_read_by_load_is_not_merged_twice() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "llm:\n  provider: ollama\n  model: llama3.2\n  endpoint: http://from-file:11434\nanalysis:\n  chunking:\n    maxTokens: 900\n",
        )
        .unwrap();

        let mut config = AppConfig {
            workspace: temp.path().to_path_buf(),
            config_file: Some(path.clone()),
            ..AppConfig::default()
        };
        config.llm.endpoint = Some("http://from-env:11434".into());

        let same = config.clone().with_config_file(&path).unwrap();
        assert_eq!(same.llm.endpoint.as_deref(), Some("http://from-env:11434"));
        assert_eq!(same.analysis.chunking.max_tokens, 4000);

        let other = AppConfig {
            workspace: temp.path().to_path_buf(),
            ..AppConfig::default()
        }
        .with_config_file(&path)
        .unwrap();
        assert_eq!(other.analysis.chunking.max_tokens, 900);
        assert_eq!(other.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_merge_yaml_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "analysis: [1, 2").unwrap();
        assert!(matches!(
            AppConfig::default().merge_yaml(&path),
            Err(AppError::Config(_))
        ));
    }
}
