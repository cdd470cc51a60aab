//! Error types for tally ingestion
//!
//! Messages are shown to operators as-is, so each variant says what went wrong
//! and, where there is one, what to do about it.

use std::path::PathBuf;
use tally_common::TallyError;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Source file could not be opened or parsed as CSV
    #[error("Cannot read '{file}': {reason}")]
    FileUnreadable { file: String, reason: String },

    /// Normalised header differs from the dataset schema
    #[error("Column mismatch in '{file}': expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        file: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Warehouse loader rejected the file or failed mid-transfer
    #[error("Load of '{file}' failed: {detail}")]
    LoadFailure { file: String, detail: String },

    /// Ledger could not be read or appended
    #[error("Ledger '{}' I/O failed: {source}. Check permissions on the ledger directory.", path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input, processed or quarantine folder is unusable
    #[error("Folder '{}' is not usable: {source}", path.display())]
    Folder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another run of the same dataset holds the lock
    #[error("Another run holds '{}'. If no run is active, the lock is stale; remove it and retry.", lock_path.display())]
    RunLocked { lock_path: PathBuf },

    #[error("Unknown dataset '{0}'. Run 'tally-ingest schemas' to list registered datasets.")]
    SchemaNotFound(String),

    #[error("Invalid schema '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Configuration error: {0}. Check tally.yaml or the TALLY_* environment variables.")]
    Config(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Common(#[from] TallyError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    pub fn unreadable(file: impl Into<String>, reason: impl ToString) -> Self {
        Self::FileUnreadable {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    pub fn load_failure(file: impl Into<String>, detail: impl ToString) -> Self {
        Self::LoadFailure {
            file: file.into(),
            detail: detail.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn ledger_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LedgerIo {
            path: path.into(),
            source,
        }
    }

    pub fn folder(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Folder {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts a whole run rather than a single file
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::FileUnreadable { .. }
                | IngestError::SchemaMismatch { .. }
                | IngestError::LoadFailure { .. }
        )
    }
}
