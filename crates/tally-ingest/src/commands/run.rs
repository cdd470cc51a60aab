//! `tally-ingest run` command implementation
//!
//! Runs one independent coordinator per requested dataset. A fatal error in
//! one dataset is reported and the remaining datasets still run; the command
//! then fails with the first such error.

use super::load_registry;
use crate::config::IngestConfig;
use crate::coordinator::{FileOutcome, IngestionCoordinator, RunOptions, RunSummary};
use crate::error::Result;
use crate::loader;
use colored::Colorize;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, datasets: &[String], all: bool, dry_run: bool) -> Result<()> {
    let config = IngestConfig::load(config_path)?;
    let registry = load_registry(&config)?;

    let names: Vec<String> = if all {
        registry.names().map(str::to_string).collect()
    } else {
        datasets.to_vec()
    };

    // Resolve every name before touching any files
    let schemas = names
        .iter()
        .map(|name| registry.schema_for(name).cloned())
        .collect::<Result<Vec<_>>>()?;

    let loader = loader::from_config(&config.warehouse)?;
    let options = RunOptions { dry_run };
    let mut first_error = None;

    for schema in schemas {
        let name = schema.name.clone();
        let result = match IngestionCoordinator::open(&config, schema, loader.clone()) {
            Ok(mut coordinator) => coordinator.run(&options).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => print_summary(&summary),
            Err(e) => {
                tracing::error!(dataset = %name, error = %e, "Run aborted");
                println!("{} {}: {}", "✗".red(), name.bold(), e);
                println!();
                first_error.get_or_insert(e);
            },
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_summary(summary: &RunSummary) {
    let title = if summary.dry_run {
        format!("{} (dry run)", summary.dataset)
    } else {
        summary.dataset.clone()
    };
    println!("{}", title.cyan().bold());

    if summary.reports.is_empty() {
        println!("  No new files.");
    }

    for report in &summary.reports {
        let line = match &report.outcome {
            FileOutcome::Admitted => format!("{} {}  admitted", "✓".green(), report.filename),
            FileOutcome::Ingested {
                rows,
                relocated,
                already_loaded,
            } => {
                let mut line = format!("{} {}  ingested ({} rows)", "✓".green(), report.filename, rows);
                if *already_loaded {
                    line.push_str(", already in warehouse");
                }
                if !relocated {
                    line.push_str(&format!(", {}", "not moved to processed".yellow()));
                }
                line
            },
            FileOutcome::RejectedSchema { detail, quarantined } => {
                let mut line = format!("{} {}  rejected: {}", "✗".red(), report.filename, detail);
                if *quarantined {
                    line.push_str(" (quarantined)");
                }
                line
            },
            FileOutcome::LoadFailed { detail }
            | FileOutcome::Unreadable { detail }
            | FileOutcome::RecordFailed { detail } => format!(
                "{} {}  {}: {}",
                "✗".red(),
                report.filename,
                report.outcome.label(),
                detail
            ),
        };
        println!("  {}", line);
    }

    println!(
        "  {} discovered, {} ingested, {} admitted, {} rejected, {} failed ({} rows)",
        summary.discovered(),
        summary.ingested(),
        summary.admitted(),
        summary.rejected(),
        summary.load_failed() + summary.unreadable() + summary.record_failed(),
        summary.rows_written()
    );
    println!();
}
