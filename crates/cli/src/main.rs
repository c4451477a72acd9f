//! bundlescope CLI
//!
//! Main entry point for the bundlescope command-line tool.
//! Segments large minified JavaScript bundles and analyzes the important parts.

mod commands;

use bundlescope_core::{config::AppConfig, logging, AppResult};
use clap::{Parser, Subcommand};
use commands::{AnalyzeCommand, ChunksCommand, RulesCommand};
use std::path::PathBuf;

/// bundlescope - token-budgeted analysis of minified JavaScript
#[derive(Parser, Debug)]
#[command(name = "bundlescope")]
#[command(about = "Token-budgeted analysis of large minified JavaScript", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "BUNDLESCOPE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "BUNDLESCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// LLM provider (ollama, openai)
    #[arg(short, long, global = true, env = "BUNDLESCOPE_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "BUNDLESCOPE_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a bundle and print the merged report
    Analyze(AnalyzeCommand),

    /// Show the chunk plan for a bundle without analyzing it
    Chunks(ChunksCommand),

    /// Print the bundled default rule table
    Rules(RulesCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment and the default config file
    let mut config = AppConfig::load()?;
    if let Some(path) = cli.config.as_deref() {
        config = config.with_config_file(path)?;
    }

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("bundlescope starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.llm.provider);
    tracing::debug!("Model: {}", config.llm.model);

    let command_name = match &cli.command {
        Commands::Analyze(_) => "analyze",
        Commands::Chunks(_) => "chunks",
        Commands::Rules(_) => "rules",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Analyze(cmd) => cmd.execute(&config).await,
        Commands::Chunks(cmd) => cmd.execute(&config),
        Commands::Rules(cmd) => cmd.execute(),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
