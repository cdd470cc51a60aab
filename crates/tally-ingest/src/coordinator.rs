//! Ingestion coordinator
//!
//! Drives one dataset binding through a run:
//! 1. Scan: list input files matching the naming pattern and absent from the ledger
//! 2. Validate: admit a file only if its header matches the schema exactly
//! 3. Load: hand the rows to the warehouse loader and wait for the result
//! 4. Record: append the filename to the ledger, then rename the file into the
//!    processed folder
//!
//! Per-file failures are reported and the run moves on; the file stays where
//! it is and is a candidate again next run. Only problems that put the whole
//! run at risk (ledger unreadable, folders unusable, lock held) end it early.
//!
//! The ledger is written before the file is moved. If the process dies
//! between the two, the file is skipped next run because it is in the ledger.
//! If the ledger write fails, the file stays in place and the next run loads
//! it again; the loader's checksum receipt turns that into a no-op.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ledger::{FileLedger, LedgerStore, RunLock};
use crate::loader::{LoadRequest, WarehouseLoader, WarehouseTarget};
use crate::scanner::{self, Candidate};
use crate::schema::DatasetSchema;
use crate::source;
use crate::validator::{self, Validation};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Folders used by one dataset binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPaths {
    pub input: PathBuf,
    pub processed: PathBuf,
    /// Where schema-rejected files go; `None` leaves them in place
    pub quarantine: Option<PathBuf>,
}

impl IngestPaths {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            input: config.csv_folder.clone(),
            processed: config.processed_folder.clone(),
            quarantine: config.quarantine_folder.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Validate only: no load, no ledger update, no file moves
    pub dry_run: bool,
}

/// Terminal state of one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Header matched; nothing else done (dry run)
    Admitted,
    /// Loaded and recorded
    Ingested {
        rows: u64,
        /// Renamed into the processed folder
        relocated: bool,
        /// Loader already had these contents
        already_loaded: bool,
    },
    RejectedSchema {
        detail: String,
        quarantined: bool,
    },
    LoadFailed {
        detail: String,
    },
    Unreadable {
        detail: String,
    },
    /// Loaded, but the ledger append failed; retried next run
    RecordFailed {
        detail: String,
    },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Admitted => "admitted",
            FileOutcome::Ingested { .. } => "ingested",
            FileOutcome::RejectedSchema { .. } => "rejected",
            FileOutcome::LoadFailed { .. } => "load failed",
            FileOutcome::Unreadable { .. } => "unreadable",
            FileOutcome::RecordFailed { .. } => "record failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, FileOutcome::Admitted | FileOutcome::Ingested { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub filename: String,
    pub outcome: FileOutcome,
}

/// Result of one run over one dataset
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub reports: Vec<FileReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn discovered(&self) -> usize {
        self.reports.len()
    }

    pub fn admitted(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Admitted))
    }

    pub fn ingested(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Ingested { .. }))
    }

    pub fn rows_written(&self) -> u64 {
        self.reports
            .iter()
            .map(|r| match r.outcome {
                FileOutcome::Ingested { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::RejectedSchema { .. }))
    }

    pub fn load_failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::LoadFailed { .. }))
    }

    pub fn unreadable(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Unreadable { .. }))
    }

    pub fn record_failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::RecordFailed { .. }))
    }

    pub fn failures(&self) -> usize {
        self.count(FileOutcome::is_failure)
    }

    pub fn outcome_of(&self, filename: &str) -> Option<&FileOutcome> {
        self.reports
            .iter()
            .find(|r| r.filename == filename)
            .map(|r| &r.outcome)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// Runs scan, validate, load and record for one dataset binding
pub struct IngestionCoordinator<L: LedgerStore = FileLedger> {
    schema: DatasetSchema,
    target: WarehouseTarget,
    paths: IngestPaths,
    loader: Arc<dyn WarehouseLoader>,
    ledger: L,
    _lock: Option<RunLock>,
}

impl IngestionCoordinator<FileLedger> {
    /// Set up a coordinator from configuration
    ///
    /// Takes the run lock when `lock_runs` is set, then loads the ledger. A
    /// ledger that exists but cannot be read is an error.
    pub fn open(
        config: &IngestConfig,
        schema: DatasetSchema,
        loader: Arc<dyn WarehouseLoader>,
    ) -> Result<Self> {
        let ledger_path = config.ledger_path(&schema.name);
        let lock = if config.lock_runs {
            Some(RunLock::acquire(&ledger_path)?)
        } else {
            None
        };
        let ledger = FileLedger::open(&ledger_path)?;

        let target = WarehouseTarget {
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.clone(),
            table: schema.table.clone(),
            location: config.location.clone(),
            credentials_file: config.credentials_file.clone(),
        };

        let mut coordinator = Self::new(schema, target, IngestPaths::from_config(config), loader, ledger);
        coordinator._lock = lock;
        Ok(coordinator)
    }
}

impl<L: LedgerStore> IngestionCoordinator<L> {
    pub fn new(
        schema: DatasetSchema,
        target: WarehouseTarget,
        paths: IngestPaths,
        loader: Arc<dyn WarehouseLoader>,
        ledger: L,
    ) -> Self {
        Self {
            schema,
            target,
            paths,
            loader,
            ledger,
            _lock: None,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    /// Process every current candidate once
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "ingest_run",
            %run_id,
            dataset = %self.schema.name,
            dry_run = options.dry_run
        );
        self.run_inner(run_id, options).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid, options: &RunOptions) -> Result<RunSummary> {
        let started_at = Utc::now();

        if !options.dry_run {
            ensure_folder(&self.paths.processed).await?;
            if let Some(quarantine) = &self.paths.quarantine {
                ensure_folder(quarantine).await?;
            }
        }

        let candidates = scanner::scan(
            &self.paths.input,
            &self.schema.pattern,
            &self.schema.name,
            &self.ledger,
        )?;

        if candidates.is_empty() {
            tracing::info!(folder = %self.paths.input.display(), "No new files to ingest");
        } else {
            tracing::info!(
                count = candidates.len(),
                table = %self.target.full_table_id(),
                loader = %self.loader.describe(),
                "Found new files"
            );
        }

        let mut reports = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let outcome = self.process(&candidate, options).await;
            log_outcome(&candidate.filename, &outcome);
            reports.push(FileReport {
                filename: candidate.filename,
                outcome,
            });
        }

        let summary = RunSummary {
            run_id,
            dataset: self.schema.name.clone(),
            started_at,
            completed_at: Utc::now(),
            dry_run: options.dry_run,
            reports,
        };

        tracing::info!(
            discovered = summary.discovered(),
            ingested = summary.ingested(),
            admitted = summary.admitted(),
            rejected = summary.rejected(),
            load_failed = summary.load_failed(),
            unreadable = summary.unreadable(),
            record_failed = summary.record_failed(),
            rows = summary.rows_written(),
            duration_ms = summary.duration().num_milliseconds(),
            "Run complete"
        );

        Ok(summary)
    }

    async fn process(&mut self, candidate: &Candidate, options: &RunOptions) -> FileOutcome {
        let validation = match validator::validate(candidate, &self.schema) {
            Ok(v) => v,
            Err(e) => return FileOutcome::Unreadable { detail: e.to_string() },
        };

        if let Validation::Rejected(detail) = validation {
            let quarantined = if options.dry_run {
                false
            } else {
                self.quarantine(candidate).await
            };
            return FileOutcome::RejectedSchema {
                detail: detail.to_string(),
                quarantined,
            };
        }

        if options.dry_run {
            return FileOutcome::Admitted;
        }

        let table = match source::read_table(&candidate.path) {
            Ok(table) => table,
            Err(e) => return FileOutcome::Unreadable { detail: e.to_string() },
        };

        // The file may have been replaced since its header was checked
        if let Validation::Rejected(detail) = validator::check_header(&table.header, &self.schema) {
            return FileOutcome::RejectedSchema {
                detail: detail.to_string(),
                quarantined: false,
            };
        }

        let request = LoadRequest {
            source_file: &candidate.filename,
            checksum: &table.checksum,
            target: &self.target,
            schema: &self.schema,
            rows: &table.rows,
        };
        let receipt = match self.loader.load(&request).await {
            Ok(receipt) => receipt,
            Err(IngestError::LoadFailure { detail, .. }) => return FileOutcome::LoadFailed { detail },
            Err(e) => return FileOutcome::LoadFailed { detail: e.to_string() },
        };

        if let Err(e) = self.ledger.record(&candidate.filename) {
            return FileOutcome::RecordFailed { detail: e.to_string() };
        }

        let relocated = self.relocate(candidate).await;

        FileOutcome::Ingested {
            rows: receipt.rows_written,
            relocated,
            already_loaded: receipt.already_loaded,
        }
    }

    /// Rename into the processed folder, never overwriting
    async fn relocate(&self, candidate: &Candidate) -> bool {
        move_into(&candidate.path, &self.paths.processed, &candidate.filename).await
    }

    async fn quarantine(&self, candidate: &Candidate) -> bool {
        match &self.paths.quarantine {
            Some(folder) => move_into(&candidate.path, folder, &candidate.filename).await,
            None => false,
        }
    }
}

async fn ensure_folder(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| IngestError::folder(path, e))
}

async fn move_into(from: &Path, folder: &Path, filename: &str) -> bool {
    let dest = folder.join(filename);

    match tokio::fs::try_exists(&dest).await {
        Ok(false) => {},
        Ok(true) => {
            tracing::warn!(
                file = %filename,
                dest = %dest.display(),
                "Destination already exists, leaving file in place"
            );
            return false;
        },
        Err(e) => {
            tracing::warn!(file = %filename, dest = %dest.display(), error = %e, "Cannot check destination");
            return false;
        },
    }

    match tokio::fs::rename(from, &dest).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                file = %filename,
                dest = %dest.display(),
                error = %e,
                "Failed to move file, leaving it in place"
            );
            false
        },
    }
}

fn log_outcome(filename: &str, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Admitted => {
            tracing::info!(file = %filename, outcome = outcome.label(), "Header matches schema");
        },
        FileOutcome::Ingested {
            rows,
            relocated,
            already_loaded,
        } => {
            tracing::info!(
                file = %filename,
                outcome = outcome.label(),
                rows,
                relocated,
                already_loaded,
                "File ingested"
            );
        },
        FileOutcome::RejectedSchema { detail, quarantined } => {
            tracing::warn!(
                file = %filename,
                outcome = outcome.label(),
                quarantined,
                detail = %detail,
                "Column mismatch, skipping upload"
            );
        },
        FileOutcome::LoadFailed { detail } => {
            tracing::warn!(file = %filename, outcome = outcome.label(), detail = %detail, "Load failed");
        },
        FileOutcome::Unreadable { detail } => {
            tracing::warn!(file = %filename, outcome = outcome.label(), detail = %detail, "Cannot read file");
        },
        FileOutcome::RecordFailed { detail } => {
            tracing::error!(
                file = %filename,
                outcome = outcome.label(),
                detail = %detail,
                "Loaded but not recorded; the next run will retry"
            );
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn report(filename: &str, outcome: FileOutcome) -> FileReport {
        FileReport {
            filename: filename.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            dataset: "sales".to_string(),
            started_at: now,
            completed_at: now,
            dry_run: false,
            reports: vec![
                report(
                    "sales_1.csv",
                    FileOutcome::Ingested {
                        rows: 10,
                        relocated: true,
                        already_loaded: false,
                    },
                ),
                report(
                    "sales_2.csv",
                    FileOutcome::Ingested {
                        rows: 5,
                        relocated: false,
                        already_loaded: false,
                    },
                ),
                report(
                    "sales_3.csv",
                    FileOutcome::RejectedSchema {
                        detail: "missing CANAL_VTA".to_string(),
                        quarantined: false,
                    },
                ),
                report("sales_4.csv", FileOutcome::LoadFailed { detail: "x".to_string() }),
            ],
        };

        assert_eq!(summary.discovered(), 4);
        assert_eq!(summary.ingested(), 2);
        assert_eq!(summary.rows_written(), 15);
        assert_eq!(summary.rejected(), 1);
        assert_eq!(summary.load_failed(), 1);
        assert_eq!(summary.failures(), 2);
        assert_eq!(summary.outcome_of("sales_4.csv").map(FileOutcome::label), Some("load failed"));
        assert!(summary.outcome_of("sales_9.csv").is_none());
    }

    #[test]
    fn test_outcome_failure_classification() {
        assert!(!FileOutcome::Admitted.is_failure());
        assert!(FileOutcome::Unreadable { detail: String::new() }.is_failure());
        assert!(FileOutcome::RecordFailed { detail: String::new() }.is_failure());
    }
}
