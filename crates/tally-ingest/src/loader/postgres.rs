//! PostgreSQL warehouse loader
//!
//! Rows go to `"<dataset_id>"."<table>"`, which must already exist with the
//! schema's columns. Each file is loaded in a single transaction together with
//! its receipt in `tally_load_receipts`, so a file is either fully appended and
//! receipted or not touched at all.

use super::{coerce_rows, CellValue, LoadReceipt, LoadRequest, WarehouseLoader};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tally_common::FieldType;

/// Postgres caps bind parameters per statement at 65535
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_BATCH: usize = 1_000;

const CREATE_RECEIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tally_load_receipts (
    table_name   TEXT        NOT NULL,
    checksum     TEXT        NOT NULL,
    source_file  TEXT        NOT NULL,
    rows_written BIGINT      NOT NULL,
    loaded_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (table_name, source_file, checksum)
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresLoader {
    pool: PgPool,
}

impl PostgresLoader {
    /// Connect immediately, failing if the database is unreachable
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Build the pool without connecting; the first load connects
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_in_transaction(&self, request: &LoadRequest<'_>) -> std::result::Result<LoadReceipt, LoadError> {
        let table_name = request.target.full_table_id();
        let mut tx = self.pool.begin().await?;

        sqlx::query(CREATE_RECEIPTS_TABLE).execute(&mut *tx).await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT rows_written FROM tally_load_receipts \
             WHERE table_name = $1 AND source_file = $2 AND checksum = $3",
        )
        .bind(&table_name)
        .bind(request.source_file)
        .bind(request.checksum)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(LoadReceipt {
                rows_written: 0,
                already_loaded: true,
            });
        }

        let rows = coerce_rows(request).map_err(LoadError::Ingest)?;

        let columns = request
            .schema
            .fields
            .iter()
            .map(|f| quote_ident(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {}.{} ({}) ",
            quote_ident(&request.target.dataset_id),
            quote_ident(&request.target.table),
            columns
        );

        for batch in rows.chunks(rows_per_batch(request.schema.fields.len())) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert);
            builder.push_values(batch, |mut values, row| {
                for (field, cell) in request.schema.fields.iter().zip(row) {
                    match cell {
                        CellValue::Null => match field.field_type {
                            FieldType::String => values.push_bind(None::<String>),
                            FieldType::Date => values.push_bind(None::<NaiveDate>),
                            FieldType::Float => values.push_bind(None::<f64>),
                            FieldType::Integer => values.push_bind(None::<i64>),
                            FieldType::Boolean => values.push_bind(None::<bool>),
                        },
                        CellValue::Text(s) => values.push_bind(s.clone()),
                        CellValue::Date(d) => values.push_bind(*d),
                        CellValue::Float(f) => values.push_bind(*f),
                        CellValue::Integer(i) => values.push_bind(*i),
                        CellValue::Boolean(b) => values.push_bind(*b),
                    };
                }
            });
            builder.build().execute(&mut *tx).await?;
        }

        sqlx::query(
            "INSERT INTO tally_load_receipts (table_name, checksum, source_file, rows_written) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&table_name)
        .bind(request.checksum)
        .bind(request.source_file)
        .bind(rows.len() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LoadReceipt {
            rows_written: rows.len() as u64,
            already_loaded: false,
        })
    }
}

/// Keeps database errors apart from row coercion errors inside the transaction
enum LoadError {
    Ingest(IngestError),
    Database(sqlx::Error),
}

impl From<sqlx::Error> for LoadError {
    fn from(e: sqlx::Error) -> Self {
        LoadError::Database(e)
    }
}

#[async_trait]
impl WarehouseLoader for PostgresLoader {
    fn describe(&self) -> String {
        "postgres".to_string()
    }

    async fn load(&self, request: &LoadRequest<'_>) -> Result<LoadReceipt> {
        match self.load_in_transaction(request).await {
            Ok(receipt) => Ok(receipt),
            Err(LoadError::Ingest(e)) => Err(e),
            Err(LoadError::Database(e)) => Err(IngestError::load_failure(request.source_file, e)),
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn rows_per_batch(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, MAX_ROWS_PER_BATCH)
}
