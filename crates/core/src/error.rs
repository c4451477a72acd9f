//! Error types for bundlescope.
//!
//! Only configuration, input-loading and rule-table errors abort a run.
//! Per-chunk analyzer failures are captured as data by the orchestrator and
//! never surface through this enum.

use thiserror::Error;

/// Unified error type for bundlescope.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or unreadable configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source buffer could not be loaded (unreadable, not UTF-8)
    #[error("Input error: {0}")]
    Input(String),

    /// Security pattern or library signature tables are invalid
    #[error("Rule table error: {0}")]
    Rules(String),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Analysis pipeline errors
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether this error must stop a run before any chunk is dispatched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_) | AppError::Io(_) | AppError::Input(_) | AppError::Rules(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::Config("overlap".into()).is_fatal());
        assert!(AppError::Input("not utf-8".into()).is_fatal());
        assert!(AppError::Rules("bad regex".into()).is_fatal());
        assert!(!AppError::Llm("timeout".into()).is_fatal());
        assert!(!AppError::Analysis("merge".into()).is_fatal());
    }

    #[test]
    fn test_yaml_error_converts() {
        let err: AppError = serde_yaml::from_str::<Vec<u32>>("{").unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
