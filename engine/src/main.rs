// Maestro domain-orchestration engine
// Main entry point for the maestro binary

use clap::Parser;
use maestro_engine::cli::{Cli, Command};
use maestro_engine::config::Config;
use maestro_engine::daemon::EngineDaemon;
use maestro_engine::handlers::{
    handle_history, handle_plans, handle_status, handle_tick, OutputFormat,
};
use maestro_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // CLI flag wins over the configured log level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!("Maestro Engine v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Start => {
            tracing::info!("Starting engine...");
            EngineDaemon::new(config).run().await
        }

        Command::Tick { count } => handle_tick(&config, count, format).await,

        Command::Status => handle_status(&config, format).await,

        Command::History { limit } => handle_history(&config, limit, format).await,

        Command::Plans { limit } => handle_plans(&config, limit, format).await,
    }
}
