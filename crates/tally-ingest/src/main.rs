//! Tally Ingest - Main entry point

use clap::Parser;
use std::process;
use tally_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tally_ingest::{commands, Cli, Commands};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("tally-ingest")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("Warning: ignoring LOG_* settings: {}", e);
            log_config
        },
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> tally_ingest::Result<()> {
    let config = cli.config.as_deref();

    match &cli.command {
        Commands::Run {
            datasets,
            all,
            dry_run,
        } => commands::run::run(config, datasets, *all, *dry_run).await,
        Commands::Status { dataset } => commands::status::run(config, dataset.as_deref()),
        Commands::Schemas { name } => commands::schemas::run(config, name.as_deref()),
        Commands::Validate { dataset, file } => commands::validate::run(config, dataset, file),
    }
}
