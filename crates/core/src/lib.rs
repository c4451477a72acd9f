//! bundlescope core library
//!
//! Foundational utilities shared by every bundlescope crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Application and analysis configuration

pub mod analysis;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use analysis::{
    AnalysisConfig, BackoffConfig, ChunkingConfig, Focus, FocusWeights, LibraryConfig,
    MergeConfig, OrchestratorConfig, ScoringConfig,
};
pub use config::{AppConfig, LlmSettings};
pub use error::{AppError, AppResult};
