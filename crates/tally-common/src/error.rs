//! Error types shared across Tally crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Main error type for shared Tally utilities
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown field type '{0}'. Expected one of: STRING, DATE, FLOAT, INTEGER, BOOLEAN")]
    UnknownFieldType(String),

    #[error("Unknown field mode '{0}'. Expected REQUIRED or NULLABLE")]
    UnknownFieldMode(String),
}
