//! Warehouse field descriptors
//!
//! Dataset schemas are ordered lists of [`FieldSpec`]. Type names follow the
//! warehouse vocabulary (`STRING`, `DATE`, `FLOAT`, ...) and accept the common
//! `*64` aliases when read from configuration.

use crate::error::TallyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column type in the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    String,
    Date,
    Float,
    Integer,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Date => "DATE",
            FieldType::Float => "FLOAT",
            FieldType::Integer => "INTEGER",
            FieldType::Boolean => "BOOLEAN",
        }
    }
}

impl FromStr for FieldType {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STRING" => Ok(FieldType::String),
            "DATE" => Ok(FieldType::Date),
            "FLOAT" | "FLOAT64" => Ok(FieldType::Float),
            "INTEGER" | "INT64" => Ok(FieldType::Integer),
            "BOOLEAN" | "BOOL" => Ok(FieldType::Boolean),
            _ => Err(TallyError::UnknownFieldType(s.to_string())),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = TallyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nullability of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldMode {
    #[default]
    Required,
    Nullable,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Required => "REQUIRED",
            FieldMode::Nullable => "NULLABLE",
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldMode::Nullable)
    }
}

impl FromStr for FieldMode {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "REQUIRED" => Ok(FieldMode::Required),
            "NULLABLE" => Ok(FieldMode::Nullable),
            _ => Err(TallyError::UnknownFieldMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for FieldMode {
    type Error = TallyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldMode> for String {
    fn from(value: FieldMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a dataset schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Column name as it appears in the target table (after header normalisation)
    pub name: String,

    /// Column type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Nullability (defaults to REQUIRED)
    #[serde(default)]
    pub mode: FieldMode,
}

impl FieldSpec {
    /// Create a REQUIRED field
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Required,
        }
    }

    /// Create a NULLABLE field
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
        }
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.field_type, self.mode)
    }
}
