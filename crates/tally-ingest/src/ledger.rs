//! Ingestion ledger
//!
//! The ledger is the durable set of filenames already appended to the
//! warehouse. On disk it is a plain text file, one filename per line, only ever
//! appended to. A filename is recorded only after the loader confirmed the
//! load, and is never removed.

use crate::error::{IngestError, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Membership test and append over already-ingested filenames
pub trait LedgerStore {
    /// True iff `filename` was previously recorded
    fn contains(&self, filename: &str) -> bool;

    /// Durably record `filename`; recording an existing entry is a no-op
    fn record(&mut self, filename: &str) -> Result<()>;

    /// Number of recorded filenames
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ledger backed by an append-only text file
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    entries: HashSet<String>,
    /// Whether the file is empty or ends with a newline
    terminated: bool,
}

impl FileLedger {
    /// Load the ledger, starting empty when the file does not exist yet
    ///
    /// Any other read failure is returned as [`IngestError::LedgerIo`] and must
    /// abort the run: an unreadable ledger would let files be ingested twice.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::ledger_io(&path, e))?;
        }
        Self::read(path)
    }

    /// Like [`FileLedger::open`], but leaves the filesystem untouched
    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(IngestError::ledger_io(&path, e)),
        };

        let entries: HashSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        tracing::debug!(
            ledger = %path.display(),
            entries = entries.len(),
            "Loaded ingestion ledger"
        );

        Ok(Self {
            path,
            terminated: content.is_empty() || content.ends_with('\n'),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded filenames in lexicographic order
    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

impl LedgerStore for FileLedger {
    fn contains(&self, filename: &str) -> bool {
        self.entries.contains(filename)
    }

    fn record(&mut self, filename: &str) -> Result<()> {
        if self.contains(filename) {
            return Ok(());
        }
        if filename.trim() != filename || filename.is_empty() || filename.contains(['\n', '\r']) {
            return Err(IngestError::ledger_io(
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("filename {:?} cannot be stored as a ledger line", filename),
                ),
            ));
        }

        // One write per entry: a crash leaves either the whole line or nothing
        // that parses as this filename.
        let mut line = String::with_capacity(filename.len() + 2);
        if !self.terminated {
            line.push('\n');
        }
        line.push_str(filename);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IngestError::ledger_io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| IngestError::ledger_io(&self.path, e))?;

        self.terminated = true;
        self.entries.insert(filename.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Exclusive lock for one dataset's runs, held as `<ledger>.lock`
///
/// The lock file is created with create-new semantics and removed on drop. A
/// lock left behind by a crashed run has to be removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(ledger_path: &Path) -> Result<Self> {
        let path = Self::lock_path(ledger_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::ledger_io(&path, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(IngestError::RunLocked { lock_path: path });
            },
            Err(e) => return Err(IngestError::ledger_io(&path, e)),
        };

        let owner = format!(
            "pid={} started={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        if let Err(e) = file.write_all(owner.as_bytes()) {
            tracing::warn!(lock = %path.display(), error = %e, "Could not write lock owner");
        }

        tracing::debug!(lock = %path.display(), "Acquired run lock");
        Ok(Self { path })
    }

    pub fn lock_path(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
