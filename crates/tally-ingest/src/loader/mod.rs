//! Warehouse loaders
//!
//! A [`WarehouseLoader`] appends the rows of one admitted file to a target
//! table. Loaders must append, never overwrite, and must use the schema they
//! are given rather than inferring one. `load` resolves only once the rows are
//! durable (or definitely not written).
//!
//! Every load carries the file's name and checksum. A loader keeps a receipt
//! per table for each (file, checksum) pair, so retrying a file whose ledger
//! entry was lost reports `already_loaded` instead of appending the rows
//! twice. Differently named files with identical bytes are separate loads.

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::{IngestError, Result};
use crate::schema::DatasetSchema;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;
use tally_common::{FieldSpec, FieldType};

pub mod local;
#[cfg(feature = "database")]
pub mod postgres;

pub use local::LocalTableLoader;
#[cfg(feature = "database")]
pub use postgres::PostgresLoader;

/// Where a dataset's rows go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub dataset_id: String,
    pub table: String,
    pub location: String,
    /// Opaque credential reference, passed through untouched
    pub credentials_file: Option<PathBuf>,
}

impl WarehouseTarget {
    /// `project.dataset.table`
    pub fn full_table_id(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table)
    }
}

/// One file's worth of rows to append
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub source_file: &'a str,
    /// SHA-256 of the source file bytes
    pub checksum: &'a str,
    pub target: &'a WarehouseTarget,
    pub schema: &'a DatasetSchema,
    /// Data rows in schema column order
    pub rows: &'a [Vec<String>],
}

/// Confirmation of a completed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReceipt {
    pub rows_written: u64,
    /// The file and checksum had a receipt already; nothing was appended
    pub already_loaded: bool,
}

#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    /// Short description for logs, e.g. "local:/srv/warehouse"
    fn describe(&self) -> String;

    /// Append `request.rows` to the target table
    ///
    /// Row-level problems (bad dates, missing required values) are reported
    /// as [`IngestError::LoadFailure`] and leave the table unchanged.
    async fn load(&self, request: &LoadRequest<'_>) -> Result<LoadReceipt>;
}

/// Build the loader selected by `config`
pub fn from_config(config: &WarehouseConfig) -> Result<Arc<dyn WarehouseLoader>> {
    match config.backend {
        WarehouseBackend::Local => Ok(Arc::new(LocalTableLoader::new(&config.local_dir))),
        #[cfg(feature = "database")]
        WarehouseBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                IngestError::config("the postgres backend needs warehouse.database_url or DATABASE_URL")
            })?;
            Ok(Arc::new(PostgresLoader::connect_lazy(url)?))
        },
        #[cfg(not(feature = "database"))]
        WarehouseBackend::Postgres => Err(IngestError::config(
            "the postgres backend is not compiled in; rebuild with --features database",
        )),
    }
}

/// A typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Date(NaiveDate),
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

impl CellValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Integer(i) => serde_json::Value::from(*i),
            CellValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"];
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce one data row to the schema's types
///
/// `line` is the 1-based data row number used in error messages. Empty cells
/// are NULL, which only NULLABLE fields accept.
pub fn coerce_row(
    schema: &DatasetSchema,
    row: &[String],
    line: usize,
) -> std::result::Result<Vec<CellValue>, String> {
    if row.len() != schema.fields.len() {
        return Err(format!(
            "row {}: expected {} values, found {}",
            line,
            schema.fields.len(),
            row.len()
        ));
    }

    schema
        .fields
        .iter()
        .zip(row)
        .map(|(field, raw)| {
            coerce_cell(field, raw).map_err(|reason| format!("row {}, column {}: {}", line, field.name, reason))
        })
        .collect()
}

fn coerce_cell(field: &FieldSpec, raw: &str) -> std::result::Result<CellValue, String> {
    let value = raw.trim();
    if value.is_empty() {
        return if field.mode.is_nullable() {
            Ok(CellValue::Null)
        } else {
            Err("required value is missing".to_string())
        };
    }

    match field.field_type {
        FieldType::String => Ok(CellValue::Text(raw.to_string())),
        FieldType::Date => parse_date(value)
            .map(CellValue::Date)
            .ok_or_else(|| format!("'{}' is not a valid DATE", value)),
        FieldType::Float => parse_float(value)
            .map(CellValue::Float)
            .ok_or_else(|| format!("'{}' is not a valid FLOAT", value)),
        FieldType::Integer => value
            .parse::<i64>()
            .map(CellValue::Integer)
            .map_err(|_| format!("'{}' is not a valid INTEGER", value)),
        FieldType::Boolean => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(CellValue::Boolean(true)),
            "false" | "0" => Ok(CellValue::Boolean(false)),
            _ => Err(format!("'{}' is not a valid BOOLEAN", value)),
        },
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
}

/// Accepts a decimal comma when no decimal point is present
fn parse_float(value: &str) -> Option<f64> {
    let parsed = if value.contains(',') && !value.contains('.') {
        value.replace(',', ".").parse::<f64>().ok()
    } else {
        value.parse::<f64>().ok()
    };
    parsed.filter(|f| f.is_finite())
}

/// Coerce every row, stopping at the first bad one
pub(crate) fn coerce_rows(request: &LoadRequest<'_>) -> Result<Vec<Vec<CellValue>>> {
    request
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| coerce_row(request.schema, row, i + 1))
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(|detail| IngestError::load_failure(request.source_file, detail))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn schema() -> DatasetSchema {
        DatasetSchema {
            name: "mixed".to_string(),
            table: "mixed".to_string(),
            pattern: crate::schema::NamingPattern::new("mixed_", ".csv"),
            fields: vec![
                FieldSpec::required("DIA", FieldType::Date),
                FieldSpec::nullable("NOTA", FieldType::String),
                FieldSpec::required("MONTO", FieldType::Float),
                FieldSpec::nullable("UNIDADES", FieldType::Integer),
                FieldSpec::nullable("ACTIVO", FieldType::Boolean),
            ],
            renames: BTreeMap::new(),
        }
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_coerce_typed_row() {
        let cells = coerce_row(&schema(), &row(&["2024-01-31", "hola", "12,5", "3", "TRUE"]), 1).unwrap();
        assert_eq!(
            cells,
            vec![
                CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
                CellValue::Text("hola".to_string()),
                CellValue::Float(12.5),
                CellValue::Integer(3),
                CellValue::Boolean(true),
            ]
        );
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        for value in ["2024-02-01", "01/02/2024", "20240201", "2024-02-01 00:00:00"] {
            assert_eq!(parse_date(value), Some(expected), "{}", value);
        }
        assert_eq!(parse_date("2024-13-01"), None);
    }

    #[test]
    fn test_empty_cells_are_null_when_nullable() {
        let cells = coerce_row(&schema(), &row(&["20240101", "", "1.0", " ", ""]), 1).unwrap();
        assert_eq!(cells[1], CellValue::Null);
        assert_eq!(cells[3], CellValue::Null);
        assert_eq!(cells[4], CellValue::Null);
    }

    #[test]
    fn test_required_empty_cell_fails() {
        let err = coerce_row(&schema(), &row(&["20240101", "", "", "", ""]), 7).unwrap_err();
        assert_eq!(err, "row 7, column MONTO: required value is missing");
    }

    #[test]
    fn test_bad_values_fail() {
        let err = coerce_row(&schema(), &row(&["31-01-2024", "", "1", "", ""]), 2).unwrap_err();
        assert!(err.contains("not a valid DATE"));

        let err = coerce_row(&schema(), &row(&["20240101", "", "NaN", "", ""]), 2).unwrap_err();
        assert!(err.contains("not a valid FLOAT"));

        let err = coerce_row(&schema(), &row(&["20240101", "", "1", "2.5", ""]), 2).unwrap_err();
        assert!(err.contains("not a valid INTEGER"));

        let err = coerce_row(&schema(), &row(&["20240101", "", "1", "", "si"]), 2).unwrap_err();
        assert!(err.contains("not a valid BOOLEAN"));
    }

    #[test]
    fn test_wrong_arity_fails() {
        let err = coerce_row(&schema(), &row(&["20240101"]), 4).unwrap_err();
        assert_eq!(err, "row 4: expected 5 values, found 1");
    }

    #[test]
    fn test_text_is_kept_verbatim() {
        let cells = coerce_row(&schema(), &row(&["20240101", "  padded ", "1", "", ""]), 1).unwrap();
        assert_eq!(cells[1], CellValue::Text("  padded ".to_string()));
    }

    #[test]
    fn test_cell_json() {
        let date = CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(date.to_json(), serde_json::json!("2024-01-05"));
        assert_eq!(CellValue::Float(1.5).to_json(), serde_json::json!(1.5));
        assert_eq!(CellValue::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_full_table_id() {
        let target = WarehouseTarget {
            project_id: "b2b-retail".to_string(),
            dataset_id: "tivoli".to_string(),
            table: "sales".to_string(),
            location: "US".to_string(),
            credentials_file: None,
        };
        assert_eq!(target.full_table_id(), "b2b-retail.tivoli.sales");
    }
}
