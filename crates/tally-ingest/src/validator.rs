//! Header admission control
//!
//! A candidate is admitted only when its normalised header equals the schema's
//! ordered field list exactly. Nothing is coerced: extra, missing, renamed or
//! reordered columns all reject the file. Row contents are not inspected here.

use crate::error::{IngestError, Result};
use crate::scanner::Candidate;
use crate::schema::DatasetSchema;
use crate::source;
use std::collections::BTreeMap;
use std::fmt;

/// Result of comparing a header against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Admitted,
    Rejected(MismatchDetail),
}

impl Validation {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Validation::Admitted)
    }
}

/// Why a header was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchDetail {
    pub expected: Vec<String>,
    /// Header after normalisation
    pub found: Vec<String>,
}

impl MismatchDetail {
    /// Expected columns absent from the header
    pub fn missing(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|c| !self.found.contains(c))
            .map(String::as_str)
            .collect()
    }

    /// Header columns the schema does not define
    pub fn unexpected(&self) -> Vec<&str> {
        self.found
            .iter()
            .filter(|c| !self.expected.contains(c))
            .map(String::as_str)
            .collect()
    }

    /// First position where the two sequences differ, 1-based
    pub fn first_difference(&self) -> Option<usize> {
        let common = self.expected.len().min(self.found.len());
        (0..common)
            .find(|&i| self.expected[i] != self.found[i])
            .or_else(|| (self.expected.len() != self.found.len()).then_some(common))
            .map(|i| i + 1)
    }

    pub fn into_error(self, file: impl Into<String>) -> IngestError {
        IngestError::SchemaMismatch {
            file: file.into(),
            expected: self.expected,
            found: self.found,
        }
    }
}

impl fmt::Display for MismatchDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        let missing = self.missing();
        if !missing.is_empty() {
            parts.push(format!("missing {}", missing.join(", ")));
        }
        let unexpected = self.unexpected();
        if !unexpected.is_empty() {
            parts.push(format!("unexpected {}", unexpected.join(", ")));
        }
        if let Some(pos) = self.first_difference() {
            let expected = self.expected.get(pos - 1).map(String::as_str).unwrap_or("<end>");
            let found = self.found.get(pos - 1).map(String::as_str).unwrap_or("<end>");
            parts.push(format!("column {} is {} (expected {})", pos, found, expected));
        }

        write!(f, "{}", parts.join("; "))
    }
}

/// Normalise one raw column name: strip a BOM, trim, then apply renames
pub fn normalize_column(raw: &str, renames: &BTreeMap<String, String>) -> String {
    let name = raw.trim_start_matches('\u{feff}').trim();
    renames.get(name).cloned().unwrap_or_else(|| name.to_string())
}

pub fn normalize_header(raw: &[String], schema: &DatasetSchema) -> Vec<String> {
    raw.iter()
        .map(|column| normalize_column(column, &schema.renames))
        .collect()
}

/// Compare a raw header against `schema`
pub fn check_header(raw: &[String], schema: &DatasetSchema) -> Validation {
    let found = normalize_header(raw, schema);
    let matches = found.len() == schema.fields.len()
        && found.iter().zip(&schema.fields).all(|(f, spec)| *f == spec.name);

    if matches {
        Validation::Admitted
    } else {
        Validation::Rejected(MismatchDetail {
            expected: schema.field_names(),
            found,
        })
    }
}

/// Read the candidate's header and check it against `schema`
///
/// Returns `Err` only when the header cannot be read at all.
pub fn validate(candidate: &Candidate, schema: &DatasetSchema) -> Result<Validation> {
    let header = source::read_header(&candidate.path)?;
    Ok(check_header(&header, schema))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sales_header() -> Vec<String> {
        let mut header = DatasetSchema::sales().field_names();
        header[19] = "VENTA(Un)".to_string();
        header[20] = "VENTA_PUBLICO($)".to_string();
        header
    }

    fn rejected(validation: Validation) -> MismatchDetail {
        match validation {
            Validation::Rejected(detail) => detail,
            Validation::Admitted => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_exact_header_after_renames_is_admitted() {
        let schema = DatasetSchema::sales();
        assert_eq!(check_header(&sales_header(), &schema), Validation::Admitted);
        assert_eq!(check_header(&schema.field_names(), &schema), Validation::Admitted);
    }

    #[test]
    fn test_whitespace_and_bom_are_ignored() {
        let schema = DatasetSchema::sales();
        let mut header = sales_header();
        header[0] = "\u{feff}PERIODO".to_string();
        header[5] = " SECCION ".to_string();
        assert!(check_header(&header, &schema).is_admitted());
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let schema = DatasetSchema::sales();
        let mut header = sales_header();
        header.retain(|c| c != "CANAL_VTA");

        let detail = rejected(check_header(&header, &schema));
        assert_eq!(detail.missing(), vec!["CANAL_VTA"]);
        assert!(detail.unexpected().is_empty());
        assert_eq!(detail.first_difference(), Some(23));
        assert!(detail.to_string().contains("missing CANAL_VTA"));
    }

    #[test]
    fn test_renamed_column_is_rejected() {
        let schema = DatasetSchema::sales();
        let mut header = sales_header();
        header[4] = "BRAND".to_string();

        let detail = rejected(check_header(&header, &schema));
        assert_eq!(detail.missing(), vec!["MARCA"]);
        assert_eq!(detail.unexpected(), vec!["BRAND"]);
        assert_eq!(detail.first_difference(), Some(5));
    }

    #[test]
    fn test_swapped_columns_are_rejected() {
        let schema = DatasetSchema::sales();
        let mut header = sales_header();
        header.swap(1, 2);

        let detail = rejected(check_header(&header, &schema));
        assert!(detail.missing().is_empty());
        assert!(detail.unexpected().is_empty());
        assert_eq!(detail.first_difference(), Some(2));
        assert_eq!(
            detail.to_string(),
            "column 2 is COD_PROVEEDOR (expected COD_CENCOSUD)"
        );
    }

    #[test]
    fn test_extra_column_is_rejected() {
        let schema = DatasetSchema::sales();
        let mut header = sales_header();
        header.push("COMENTARIO".to_string());

        let detail = rejected(check_header(&header, &schema));
        assert_eq!(detail.unexpected(), vec!["COMENTARIO"]);
        assert_eq!(detail.first_difference(), Some(24));
    }

    #[test]
    fn test_renames_do_not_leak_between_schemas() {
        // A sales rename is not a product_loss column
        let schema = DatasetSchema::product_loss();
        let mut header = schema.field_names();
        header[19] = "MERMA_PERIODO(u)".to_string();
        assert!(check_header(&header, &schema).is_admitted());

        header[19] = "VENTA(Un)".to_string();
        assert!(!check_header(&header, &schema).is_admitted());
    }

    #[test]
    fn test_validate_reads_candidate_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales_202401.csv");
        std::fs::write(&path, format!("{}\n", sales_header().join(","))).unwrap();

        let candidate = Candidate {
            filename: "sales_202401.csv".to_string(),
            path,
            dataset: "sales".to_string(),
        };
        assert!(validate(&candidate, &DatasetSchema::sales()).unwrap().is_admitted());
    }

    #[test]
    fn test_into_error_names_file() {
        let detail = MismatchDetail {
            expected: vec!["A".into()],
            found: vec!["B".into()],
        };
        let err = detail.into_error("sales_1.csv");
        assert!(matches!(err, IngestError::SchemaMismatch { ref file, .. } if file == "sales_1.csv"));
    }
}
