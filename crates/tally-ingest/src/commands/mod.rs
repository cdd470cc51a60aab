//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod run;
pub mod schemas;
pub mod status;
pub mod validate;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::schema::SchemaRegistry;

/// Built-in schemas plus any from `schemas_file`
pub fn load_registry(config: &IngestConfig) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::with_builtin();
    if let Some(path) = &config.schemas_file {
        let count = registry.load_file(path)?;
        tracing::debug!(path = %path.display(), count, "Loaded extra schemas");
    }
    Ok(registry)
}
