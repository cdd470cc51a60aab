//! JSON-lines warehouse under a local directory
//!
//! Layout: `<root>/<project>/<dataset>/<table>.jsonl` holds one JSON object per
//! row. `<table>.receipts` next to it holds one line per loaded file:
//! `checksum<TAB>source file<TAB>loaded at<TAB>table length`.
//!
//! A receipt commits its rows. Table bytes beyond the length recorded by the
//! last receipt belong to a load that crashed or failed to write its receipt,
//! and are cut off before the next append.

use super::{coerce_rows, LoadReceipt, LoadRequest, WarehouseLoader};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct LocalTableLoader {
    root: PathBuf,
}

/// One line of a `.receipts` file
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReceiptLine {
    checksum: String,
    source_file: String,
    table_len: Option<u64>,
}

impl ReceiptLine {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split('\t');
        let checksum = parts.next().filter(|c| !c.is_empty())?.to_string();
        let source_file = parts.next()?.to_string();
        let table_len = parts.nth(1).and_then(|len| len.trim().parse().ok());
        Some(Self {
            checksum,
            source_file,
            table_len,
        })
    }

    fn matches(&self, request: &LoadRequest<'_>) -> bool {
        self.checksum == request.checksum && self.source_file == request.source_file
    }
}

impl LocalTableLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn table_path(&self, request: &LoadRequest<'_>) -> PathBuf {
        self.table_dir(request)
            .join(format!("{}.jsonl", request.target.table))
    }

    pub fn receipts_path(&self, request: &LoadRequest<'_>) -> PathBuf {
        self.table_dir(request)
            .join(format!("{}.receipts", request.target.table))
    }

    fn table_dir(&self, request: &LoadRequest<'_>) -> PathBuf {
        self.root
            .join(&request.target.project_id)
            .join(&request.target.dataset_id)
    }
}

/// Complete receipt lines, and whether the file ends in a newline
///
/// A trailing line without its newline is a torn write and does not count.
async fn read_receipts(path: &Path) -> Result<(Vec<ReceiptLine>, bool)> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let lines = content
                .split_inclusive('\n')
                .filter_map(|line| line.strip_suffix('\n'))
                .filter_map(ReceiptLine::parse)
                .collect();
            Ok((lines, content.is_empty() || content.ends_with('\n')))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((Vec::new(), true)),
        Err(e) => Err(e.into()),
    }
}

/// Table length covered by receipts; `None` when no receipt records one
fn committed_len(receipts: &[ReceiptLine]) -> Option<u64> {
    if receipts.is_empty() {
        return Some(0);
    }
    receipts.iter().rev().find_map(|r| r.table_len)
}

/// Append `bytes` at the committed end of the table, returning the new length
async fn append_rows(path: &Path, committed: Option<u64>, bytes: &[u8]) -> std::io::Result<u64> {
    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .await?;

    let mut start = file.metadata().await?.len();
    if let Some(committed) = committed.filter(|&c| c < start) {
        tracing::warn!(
            table = %path.display(),
            discarded_bytes = start - committed,
            "Discarding rows of an interrupted load"
        );
        file.set_len(committed).await?;
        start = committed;
    }

    file.seek(SeekFrom::Start(start)).await?;
    file.write_all(bytes).await?;
    file.sync_data().await?;
    Ok(start + bytes.len() as u64)
}

async fn append_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_data().await
}

#[async_trait]
impl WarehouseLoader for LocalTableLoader {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn load(&self, request: &LoadRequest<'_>) -> Result<LoadReceipt> {
        let table_path = self.table_path(request);
        let receipts_path = self.receipts_path(request);

        let (receipts, terminated) = read_receipts(&receipts_path).await?;
        if receipts.iter().any(|r| r.matches(request)) {
            tracing::info!(
                file = %request.source_file,
                table = %request.target.full_table_id(),
                "File already loaded, skipping append"
            );
            return Ok(LoadReceipt {
                rows_written: 0,
                already_loaded: true,
            });
        }

        // All rows are checked before anything is written
        let rows = coerce_rows(request)?;

        let mut buffer = Vec::new();
        for row in &rows {
            let object: serde_json::Map<String, serde_json::Value> = request
                .schema
                .fields
                .iter()
                .zip(row)
                .map(|(field, cell)| (field.name.clone(), cell.to_json()))
                .collect();
            serde_json::to_writer(&mut buffer, &object)
                .map_err(|e| IngestError::load_failure(request.source_file, e))?;
            buffer.push(b'\n');
        }

        tokio::fs::create_dir_all(self.table_dir(request)).await?;

        let end = append_rows(&table_path, committed_len(&receipts), &buffer)
            .await
            .map_err(|e| IngestError::load_failure(request.source_file, e))?;

        let receipt = format!(
            "{}{}\t{}\t{}\t{}\n",
            if terminated { "" } else { "\n" },
            request.checksum,
            request.source_file,
            chrono::Utc::now().to_rfc3339(),
            end
        );
        append_synced(&receipts_path, receipt.as_bytes())
            .await
            .map_err(|e| IngestError::load_failure(request.source_file, e))?;

        tracing::debug!(
            file = %request.source_file,
            table = %table_path.display(),
            rows = rows.len(),
            "Appended rows"
        );

        Ok(LoadReceipt {
            rows_written: rows.len() as u64,
            already_loaded: false,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loader::WarehouseTarget;
    use crate::schema::{DatasetSchema, NamingPattern};
    use std::collections::BTreeMap;
    use tally_common::{FieldSpec, FieldType};
    use tempfile::TempDir;

    fn schema() -> DatasetSchema {
        DatasetSchema {
            name: "loss".to_string(),
            table: "loss".to_string(),
            pattern: NamingPattern::new("loss_", ".csv"),
            fields: vec![
                FieldSpec::required("DIA", FieldType::Date),
                FieldSpec::required("MONTO", FieldType::Float),
            ],
            renames: BTreeMap::new(),
        }
    }

    fn target() -> WarehouseTarget {
        WarehouseTarget {
            project_id: "proj".to_string(),
            dataset_id: "ds".to_string(),
            table: "loss".to_string(),
            location: "US".to_string(),
            credentials_file: None,
        }
    }

    fn rows(values: &[[&str; 2]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect()
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_load_appends_rows_and_receipt() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let data = rows(&[["2024-01-01", "1.5"], ["2024-01-02", "2"]]);

        let request = LoadRequest {
            source_file: "loss_1.csv",
            checksum: "abc",
            target: &target,
            schema: &schema,
            rows: &data,
        };
        let receipt = loader.load(&request).await.unwrap();
        assert_eq!(receipt, LoadReceipt { rows_written: 2, already_loaded: false });

        let table = dir.path().join("proj").join("ds").join("loss.jsonl");
        let lines = read_lines(&table);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], serde_json::json!({"DIA": "2024-01-01", "MONTO": 1.5}));

        let receipts = std::fs::read_to_string(loader.receipts_path(&request)).unwrap();
        assert!(receipts.starts_with("abc\tloss_1.csv\t"));
    }

    #[tokio::test]
    async fn test_second_load_is_append() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let first = rows(&[["2024-01-01", "1"]]);
        let second = rows(&[["2024-01-02", "2"]]);

        for (checksum, data) in [("one", &first), ("two", &second)] {
            let request = LoadRequest {
                source_file: "loss_x.csv",
                checksum,
                target: &target,
                schema: &schema,
                rows: data,
            };
            loader.load(&request).await.unwrap();
        }

        let table = dir.path().join("proj").join("ds").join("loss.jsonl");
        assert_eq!(read_lines(&table).len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_checksum_is_not_appended() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let data = rows(&[["2024-01-01", "1"]]);
        let request = LoadRequest {
            source_file: "loss_1.csv",
            checksum: "same",
            target: &target,
            schema: &schema,
            rows: &data,
        };

        loader.load(&request).await.unwrap();
        let again = loader.load(&request).await.unwrap();
        assert!(again.already_loaded);
        assert_eq!(again.rows_written, 0);
        assert_eq!(read_lines(&loader.table_path(&request)).len(), 1);
    }

    #[tokio::test]
    async fn test_bad_row_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let data = rows(&[["2024-01-01", "1"], ["not a date", "2"]]);
        let request = LoadRequest {
            source_file: "loss_1.csv",
            checksum: "bad",
            target: &target,
            schema: &schema,
            rows: &data,
        };

        let err = loader.load(&request).await.unwrap_err();
        assert!(matches!(err, IngestError::LoadFailure { .. }));
        assert!(err.to_string().contains("row 2, column DIA"));
        assert!(!loader.table_path(&request).exists());
        assert!(!loader.receipts_path(&request).exists());
    }

    fn request<'a>(
        file: &'a str,
        checksum: &'a str,
        target: &'a WarehouseTarget,
        schema: &'a DatasetSchema,
        rows: &'a [Vec<String>],
    ) -> LoadRequest<'a> {
        LoadRequest {
            source_file: file,
            checksum,
            target,
            schema,
            rows,
        }
    }

    #[tokio::test]
    async fn test_identical_files_with_different_names_both_load() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let data = rows(&[["2024-01-01", "1"]]);

        let first = request("loss_1.csv", "same", &target, &schema, &data);
        let second = request("loss_2.csv", "same", &target, &schema, &data);
        assert!(!loader.load(&first).await.unwrap().already_loaded);
        let receipt = loader.load(&second).await.unwrap();
        assert_eq!(receipt, LoadReceipt { rows_written: 1, already_loaded: false });

        assert_eq!(read_lines(&loader.table_path(&first)).len(), 2);
        assert!(loader.load(&second).await.unwrap().already_loaded);
    }

    #[tokio::test]
    async fn test_rows_without_receipt_are_replaced_on_retry() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let committed = rows(&[["2024-01-01", "1"]]);
        let retried = rows(&[["2024-01-02", "2"], ["2024-01-03", "3"]]);

        loader
            .load(&request("loss_1.csv", "one", &target, &schema, &committed))
            .await
            .unwrap();

        // Rows appended by a load that never wrote its receipt, ending mid-line
        let retry = request("loss_2.csv", "two", &target, &schema, &retried);
        let table = loader.table_path(&retry);
        let mut content = std::fs::read_to_string(&table).unwrap();
        content.push_str("{\"DIA\":\"2024-01-02\",\"MONTO\":2.0}\n{\"DIA\":\"2024-");
        std::fs::write(&table, content).unwrap();

        let receipt = loader.load(&retry).await.unwrap();
        assert_eq!(receipt.rows_written, 2);

        let lines = read_lines(&table);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], serde_json::json!({"DIA": "2024-01-02", "MONTO": 2.0}));
        assert_eq!(lines[2], serde_json::json!({"DIA": "2024-01-03", "MONTO": 3.0}));
    }

    #[tokio::test]
    async fn test_torn_receipt_does_not_count_as_loaded() {
        let dir = TempDir::new().unwrap();
        let loader = LocalTableLoader::new(dir.path());
        let (schema, target) = (schema(), target());
        let data = rows(&[["2024-01-01", "1"]]);
        let load = request("loss_1.csv", "abc", &target, &schema, &data);

        let table = loader.table_path(&load);
        std::fs::create_dir_all(table.parent().unwrap()).unwrap();
        std::fs::write(&table, "{\"DIA\":\"2024-01-01\",\"MONTO\":1.0}\n").unwrap();
        std::fs::write(loader.receipts_path(&load), "abc\tloss_1.csv\t2024-01-01T00:00").unwrap();

        let receipt = loader.load(&load).await.unwrap();
        assert!(!receipt.already_loaded);
        assert_eq!(read_lines(&table).len(), 1);

        let receipts = std::fs::read_to_string(loader.receipts_path(&load)).unwrap();
        let complete: Vec<_> = receipts.lines().collect();
        assert_eq!(complete.len(), 2);
        assert!(complete[1].starts_with("abc\tloss_1.csv\t"));
        assert!(loader.load(&load).await.unwrap().already_loaded);
    }
}
