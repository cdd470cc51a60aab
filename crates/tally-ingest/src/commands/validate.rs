//! `tally-ingest validate` command implementation
//!
//! Checks a single file against a dataset schema without loading it or
//! touching the ledger.

use super::load_registry;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::source;
use crate::validator::{self, Validation};
use colored::Colorize;
use std::path::Path;
use tally_common::checksum::sha256_file;

pub fn run(config_path: Option<&Path>, dataset: &str, file: &Path) -> Result<()> {
    let config = IngestConfig::read(config_path)?;
    let registry = load_registry(&config)?;
    let schema = registry.schema_for(dataset)?;

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let header = source::read_header(file)?;
    let checksum = sha256_file(file)?;

    println!("{}", filename.bold());
    println!("  Dataset:  {}", schema.name);
    println!("  SHA-256:  {}", checksum);
    if !schema.pattern.matches(&filename) {
        println!(
            "  {}",
            format!("Name does not match {}; a run would not pick this file up", schema.pattern).yellow()
        );
    }

    match validator::check_header(&header, schema) {
        Validation::Admitted => {
            println!("  {} header matches ({} columns)", "✓".green(), schema.fields.len());
            Ok(())
        },
        Validation::Rejected(detail) => {
            println!("  {} {}", "✗".red(), detail);
            Err(detail.into_error(filename))
        },
    }
}
