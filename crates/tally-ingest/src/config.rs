//! Configuration for ingestion runs
//!
//! Settings come from a YAML file (`tally.yaml` by default) overlaid with
//! `TALLY_*` environment variables. A `.env` file is honoured. Warehouse
//! identifiers and the credentials reference are opaque here; they are only
//! handed to the loader.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tally.yaml";

/// Default warehouse location.
pub const DEFAULT_LOCATION: &str = "US";

/// Default folder scanned for new extracts.
pub const DEFAULT_CSV_FOLDER: &str = "csv_files";

/// Default folder receiving ingested extracts.
pub const DEFAULT_PROCESSED_FOLDER: &str = "processed";

/// Default root of the local warehouse backend.
pub const DEFAULT_WAREHOUSE_DIR: &str = "warehouse";

/// Warehouse backend used to append rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// JSON-lines tables under a local directory
    #[default]
    Local,
    /// PostgreSQL (requires the `database` feature)
    Postgres,
}

impl std::str::FromStr for WarehouseBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(WarehouseBackend::Local),
            "postgres" | "postgresql" => Ok(WarehouseBackend::Postgres),
            other => Err(IngestError::config(format!(
                "unknown warehouse backend '{}', expected 'local' or 'postgres'",
                other
            ))),
        }
    }
}

/// Warehouse connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,

    /// Root directory for the local backend
    pub local_dir: PathBuf,

    /// Connection URL for the postgres backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::Local,
            local_dir: PathBuf::from(DEFAULT_WAREHOUSE_DIR),
            database_url: None,
        }
    }
}

/// Per-deployment ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Warehouse project / namespace
    pub project_id: String,

    /// Warehouse dataset holding the target tables
    pub dataset_id: String,

    /// Warehouse location (e.g. "US")
    pub location: String,

    /// Credential reference passed through to the loader
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Folder scanned for new extracts
    pub csv_folder: PathBuf,

    /// Folder receiving ingested extracts
    pub processed_folder: PathBuf,

    /// Folder holding one ledger file per dataset
    pub ledger_dir: PathBuf,

    /// When set, schema-rejected extracts are moved here instead of being retried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_folder: Option<PathBuf>,

    /// Extra dataset schemas (YAML list) merged into the built-in registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schemas_file: Option<PathBuf>,

    /// Take a lock file next to the ledger for the duration of a run
    pub lock_runs: bool,

    pub warehouse: WarehouseConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset_id: String::new(),
            location: DEFAULT_LOCATION.to_string(),
            credentials_file: None,
            csv_folder: PathBuf::from(DEFAULT_CSV_FOLDER),
            processed_folder: PathBuf::from(DEFAULT_PROCESSED_FOLDER),
            ledger_dir: PathBuf::from("."),
            quarantine_folder: None,
            schemas_file: None,
            lock_runs: true,
            warehouse: WarehouseConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Read and validate configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration without validating warehouse settings
    ///
    /// An explicit `path` must exist; the default `tally.yaml` is optional.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            },
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::config(format!(
                "config file '{}' not found",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `TALLY_*` (and `DATABASE_URL`) overrides from a key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TALLY_PROJECT_ID") {
            self.project_id = v;
        }
        if let Some(v) = lookup("TALLY_DATASET_ID") {
            self.dataset_id = v;
        }
        if let Some(v) = lookup("TALLY_LOCATION") {
            self.location = v;
        }
        if let Some(v) = lookup("TALLY_CREDENTIALS_FILE") {
            self.credentials_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TALLY_CSV_FOLDER") {
            self.csv_folder = PathBuf::from(v);
        }
        if let Some(v) = lookup("TALLY_PROCESSED_FOLDER") {
            self.processed_folder = PathBuf::from(v);
        }
        if let Some(v) = lookup("TALLY_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TALLY_QUARANTINE_FOLDER") {
            self.quarantine_folder = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TALLY_SCHEMAS_FILE") {
            self.schemas_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TALLY_LOCK_RUNS") {
            self.lock_runs = v.parse().map_err(|_| {
                IngestError::config(format!("TALLY_LOCK_RUNS must be true or false, got '{}'", v))
            })?;
        }
        if let Some(v) = lookup("TALLY_WAREHOUSE_BACKEND") {
            self.warehouse.backend = v.parse()?;
        }
        if let Some(v) = lookup("TALLY_WAREHOUSE_DIR") {
            self.warehouse.local_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.warehouse.database_url = Some(v);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        check_identifier("project_id", &self.project_id)?;
        check_identifier("dataset_id", &self.dataset_id)?;

        if self.location.trim().is_empty() {
            return Err(IngestError::config("location must not be empty"));
        }
        if self.csv_folder == self.processed_folder {
            return Err(IngestError::config(
                "csv_folder and processed_folder must be different folders",
            ));
        }
        if self.quarantine_folder.as_ref() == Some(&self.csv_folder) {
            return Err(IngestError::config(
                "quarantine_folder must differ from csv_folder",
            ));
        }
        if self.warehouse.backend == WarehouseBackend::Postgres
            && self.warehouse.database_url.is_none()
        {
            return Err(IngestError::config(
                "the postgres backend needs warehouse.database_url or DATABASE_URL",
            ));
        }
        Ok(())
    }

    /// Ledger file for a dataset, e.g. `upload_log_sales.txt`
    pub fn ledger_path(&self, dataset: &str) -> PathBuf {
        self.ledger_dir.join(format!("upload_log_{}.txt", dataset))
    }
}

/// Identifiers end up in paths and SQL, so keep them to a safe alphabet
pub(crate) fn check_identifier(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(IngestError::config(format!("{} must be set", key)));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(IngestError::config(format!(
            "{} '{}' may only contain letters, digits, '_' and '-'",
            key, value
        )));
    }
    Ok(())
}
