//! `tally-ingest schemas` command implementation

use super::load_registry;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::schema::DatasetSchema;
use colored::Colorize;
use std::path::Path;

/// List all schemas, or print one in full
pub fn run(config_path: Option<&Path>, name: Option<&str>) -> Result<()> {
    let config = IngestConfig::read(config_path)?;
    let registry = load_registry(&config)?;

    match name {
        Some(name) => print_schema(registry.schema_for(name)?),
        None => {
            println!("{}", "Registered Schemas:".cyan().bold());
            println!();
            for schema in registry.iter() {
                println!(
                    "  {:<16} {:<24} table {:<16} {} columns",
                    schema.name.green(),
                    schema.pattern.to_string(),
                    schema.table,
                    schema.fields.len()
                );
            }
        },
    }

    Ok(())
}

fn print_schema(schema: &DatasetSchema) {
    println!("{}", schema.name.cyan().bold());
    println!("  Pattern: {}", schema.pattern);
    println!("  Table:   {}", schema.table);
    println!();
    println!("{}", "Columns:".bold());
    for (i, field) in schema.fields.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, field);
    }

    if !schema.renames.is_empty() {
        println!();
        println!("{}", "Header renames:".bold());
        for (from, to) in &schema.renames {
            println!("  {} -> {}", from, to);
        }
    }
}
