//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Tally workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Checksums**: Content fingerprints for source extracts
//! - **Types**: Warehouse field descriptors used by dataset schemas
//!
//! # Example
//!
//! ```no_run
//! use tally_common::Result;
//! use tally_common::checksum::sha256_file;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let checksum = sha256_file(path)?;
//!     tracing::info!(%checksum, "Extract fingerprint");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TallyError};
pub use types::{FieldMode, FieldSpec, FieldType};
