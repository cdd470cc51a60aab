//! `tally-ingest status` command implementation
//!
//! Shows, per dataset, how many files the ledger holds and how many are
//! waiting in the input folder. Nothing is locked or modified.

use super::load_registry;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::ledger::{FileLedger, LedgerStore, RunLock};
use crate::scanner;
use crate::schema::DatasetSchema;
use colored::Colorize;
use std::path::Path;

/// Snapshot of one dataset's ingestion state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub dataset: String,
    pub ledger_entries: usize,
    pub pending: Vec<String>,
    pub locked: bool,
}

pub fn run(config_path: Option<&Path>, dataset: Option<&str>) -> Result<()> {
    let config = IngestConfig::load(config_path)?;
    let registry = load_registry(&config)?;

    let schemas: Vec<&DatasetSchema> = match dataset {
        Some(name) => vec![registry.schema_for(name)?],
        None => registry.iter().collect(),
    };

    println!("{}", "Ingestion Status:".cyan().bold());
    println!();

    for schema in schemas {
        let status = dataset_status(&config, schema)?;

        println!("{}", status.dataset.green());
        println!("  Pattern:  {}", schema.pattern);
        println!("  Table:    {}.{}", config.dataset_id, schema.table);
        println!("  Ledger:   {} ({} files)", config.ledger_path(&schema.name).display(), status.ledger_entries);
        println!("  Pending:  {}", status.pending.len());
        for filename in &status.pending {
            println!("    {}", filename);
        }
        if status.locked {
            println!("  {}", "Run lock present".yellow());
        }
        println!();
    }

    Ok(())
}

pub fn dataset_status(config: &IngestConfig, schema: &DatasetSchema) -> Result<DatasetStatus> {
    let ledger_path = config.ledger_path(&schema.name);
    let ledger = FileLedger::read(&ledger_path)?;

    let pending = if config.csv_folder.exists() {
        scanner::scan(&config.csv_folder, &schema.pattern, &schema.name, &ledger)?
            .into_iter()
            .map(|c| c.filename)
            .collect()
    } else {
        Vec::new()
    };

    Ok(DatasetStatus {
        dataset: schema.name.clone(),
        ledger_entries: ledger.len(),
        pending,
        locked: RunLock::lock_path(&ledger_path).exists(),
    })
}
