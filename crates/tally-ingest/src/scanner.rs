//! Discovery of candidate files in the input folder

use crate::error::{IngestError, Result};
use crate::ledger::LedgerStore;
use crate::schema::NamingPattern;
use std::path::{Path, PathBuf};

/// An input file eligible for validation and loading in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub filename: String,
    pub path: PathBuf,
    /// Dataset the file was matched to
    pub dataset: String,
}

/// List files in `folder` that match `pattern` and are not yet in `ledger`
///
/// The directory is listed afresh on every call. Results are sorted by
/// filename so runs are reproducible. Subdirectories and names that are not
/// valid UTF-8 are ignored.
pub fn scan<L>(folder: &Path, pattern: &NamingPattern, dataset: &str, ledger: &L) -> Result<Vec<Candidate>>
where
    L: LedgerStore + ?Sized,
{
    let entries = std::fs::read_dir(folder).map_err(|e| IngestError::folder(folder, e))?;

    let mut candidates = Vec::new();
    let mut already_ingested = 0usize;

    for entry in entries {
        let entry = entry.map_err(|e| IngestError::folder(folder, e))?;

        let Ok(filename) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if !pattern.matches(&filename) {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if ledger.contains(&filename) {
            already_ingested += 1;
            continue;
        }

        candidates.push(Candidate {
            path: entry.path(),
            filename,
            dataset: dataset.to_string(),
        });
    }

    candidates.sort_by(|a, b| a.filename.cmp(&b.filename));

    tracing::debug!(
        folder = %folder.display(),
        pattern = %pattern,
        candidates = candidates.len(),
        already_ingested,
        "Scanned input folder"
    );

    Ok(candidates)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::FileLedger;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "A\n").unwrap();
    }

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.filename.as_str()).collect()
    }

    #[test]
    fn test_scan_filters_pattern_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["sales_202402.csv", "sales_202401.csv", "product_loss_1.csv", "sales_.csv", "notes.txt", "sales_1.txt"] {
            touch(dir.path(), name);
        }
        std::fs::create_dir(dir.path().join("sales_dir.csv")).unwrap();

        let ledger = FileLedger::open(dir.path().join("ledger.txt")).unwrap();
        let pattern = NamingPattern::new("sales_", ".csv");
        let found = scan(dir.path(), &pattern, "sales", &ledger).unwrap();

        assert_eq!(names(&found), vec!["sales_202401.csv", "sales_202402.csv"]);
        assert_eq!(found[0].dataset, "sales");
        assert_eq!(found[0].path, dir.path().join("sales_202401.csv"));
    }

    #[test]
    fn test_scan_skips_ledger_entries() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sales_202401.csv");
        touch(dir.path(), "sales_202402.csv");

        let mut ledger = FileLedger::open(dir.path().join("ledger.txt")).unwrap();
        ledger.record("sales_202401.csv").unwrap();

        let pattern = NamingPattern::new("sales_", ".csv");
        let found = scan(dir.path(), &pattern, "sales", &ledger).unwrap();
        assert_eq!(names(&found), vec!["sales_202402.csv"]);
    }

    #[test]
    fn test_scan_sees_new_files_on_each_call() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open(dir.path().join("ledger.txt")).unwrap();
        let pattern = NamingPattern::new("sales_", ".csv");

        assert!(scan(dir.path(), &pattern, "sales", &ledger).unwrap().is_empty());
        touch(dir.path(), "sales_202401.csv");
        assert_eq!(scan(dir.path(), &pattern, "sales", &ledger).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open(dir.path().join("ledger.txt")).unwrap();
        let pattern = NamingPattern::new("sales_", ".csv");

        let err = scan(&dir.path().join("absent"), &pattern, "sales", &ledger).unwrap_err();
        assert!(matches!(err, IngestError::Folder { .. }));
    }
}
