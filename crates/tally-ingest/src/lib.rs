//! Tally Ingest Library
//!
//! Idempotent ingestion of CSV extracts into a warehouse table.
//!
//! # Overview
//!
//! Each dataset binding (naming pattern + schema + target table) is processed by
//! its own [`coordinator::IngestionCoordinator`]:
//!
//! - **Scan**: files in the input folder matching the dataset's naming pattern
//!   that are not in the ledger
//! - **Validate**: the header must equal the schema's ordered column list
//! - **Load**: rows are appended through a [`loader::WarehouseLoader`]
//! - **Record**: the filename is appended to the ledger, then the file is moved
//!   to the processed folder
//!
//! Files that fail any step stay in place and are retried next run.
//!
//! # Example
//!
//! ```no_run
//! use tally_ingest::config::IngestConfig;
//! use tally_ingest::coordinator::{IngestionCoordinator, RunOptions};
//! use tally_ingest::loader;
//! use tally_ingest::schema::SchemaRegistry;
//!
//! #[tokio::main]
//! async fn main() -> tally_ingest::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     let schema = SchemaRegistry::with_builtin().schema_for("sales")?.clone();
//!     let loader = loader::from_config(&config.warehouse)?;
//!
//!     let mut coordinator = IngestionCoordinator::open(&config, schema, loader)?;
//!     let summary = coordinator.run(&RunOptions::default()).await?;
//!     println!("{} file(s) ingested", summary.ingested());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod scanner;
pub mod schema;
pub mod source;
pub mod validator;

// Re-export commonly used types
pub use config::IngestConfig;
pub use coordinator::{FileOutcome, IngestionCoordinator, RunOptions, RunSummary};
pub use error::{IngestError, Result};
pub use ledger::{FileLedger, LedgerStore};
pub use schema::{DatasetSchema, SchemaRegistry};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tally - idempotent CSV ingestion into a warehouse
#[derive(Parser, Debug)]
#[command(name = "tally-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to ./tally.yaml when present)
    #[arg(short, long, env = "TALLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest new files for one or more datasets
    Run {
        /// Dataset to ingest (repeatable)
        #[arg(short, long = "dataset", required_unless_present = "all")]
        datasets: Vec<String>,

        /// Ingest every registered dataset
        #[arg(long, conflicts_with = "datasets")]
        all: bool,

        /// Scan and validate only; load nothing, move nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show ledger and pending files per dataset
    Status {
        /// Only this dataset
        #[arg(short, long)]
        dataset: Option<String>,
    },

    /// List registered schemas, or show one
    Schemas {
        /// Schema to show in full
        name: Option<String>,
    },

    /// Check one file's header against a dataset schema
    Validate {
        /// Dataset whose schema to check against
        #[arg(short, long)]
        dataset: String,

        /// CSV file to check
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_dataset_or_all() {
        assert!(Cli::try_parse_from(["tally-ingest", "run"]).is_err());
        assert!(Cli::try_parse_from(["tally-ingest", "run", "--all", "-d", "sales"]).is_err());

        let cli = Cli::try_parse_from(["tally-ingest", "run", "-d", "sales", "-d", "product_loss"]);
        match cli.map(|c| c.command) {
            Ok(Commands::Run { datasets, all, dry_run }) => {
                assert_eq!(datasets, vec!["sales", "product_loss"]);
                assert!(!all);
                assert!(!dry_run);
            },
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tally-ingest", "schemas", "-v", "--config", "x.yaml"]);
        match cli {
            Ok(cli) => {
                assert!(cli.verbose);
                assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
            },
            Err(e) => panic!("parse failed: {}", e),
        }
    }
}
