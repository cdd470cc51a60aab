//! CSV source file reading
//!
//! Extracts arrive from several exporters: some write UTF-8 (often with a BOM),
//! some Latin-1. Each field is decoded as UTF-8 when valid and as Latin-1
//! otherwise, so accented descriptions survive either way.

use crate::error::{IngestError, Result};
use std::path::Path;
use tally_common::checksum::sha256_bytes;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Fully parsed source file
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Raw header, BOM stripped, not yet normalised
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// SHA-256 of the file bytes
    pub checksum: String,
}

/// Read only the header row of `path`
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let file = display_name(path);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| IngestError::unreadable(&file, e))?;

    let header = reader
        .byte_headers()
        .map_err(|e| IngestError::unreadable(&file, e))?;
    if header.is_empty() {
        return Err(IngestError::unreadable(&file, "file has no header row"));
    }

    Ok(decode_header(header))
}

/// Read the whole file: header, data rows and checksum
pub fn read_table(path: &Path) -> Result<SourceTable> {
    let file = display_name(path);
    let bytes = std::fs::read(path).map_err(|e| IngestError::unreadable(&file, e))?;
    let checksum = sha256_bytes(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes.as_slice());

    let header = reader
        .byte_headers()
        .map_err(|e| IngestError::unreadable(&file, e))?;
    if header.is_empty() {
        return Err(IngestError::unreadable(&file, "file has no header row"));
    }
    let header = decode_header(header);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| IngestError::unreadable(&file, e))?;
        rows.push(record.iter().map(decode_field).collect());
    }

    tracing::debug!(file = %file, columns = header.len(), rows = rows.len(), "Parsed source file");

    Ok(SourceTable {
        header,
        rows,
        checksum,
    })
}

fn decode_header(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let field = if i == 0 {
                field.strip_prefix(UTF8_BOM).unwrap_or(field)
            } else {
                field
            };
            decode_field(field)
        })
        .collect()
}

/// UTF-8 when valid, Latin-1 otherwise
pub fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
