//! Dataset schemas and the schema registry
//!
//! A [`DatasetSchema`] binds one logical dataset to its file naming pattern,
//! target table and ordered column list. Column order is significant: it is the
//! order required in source headers. Schemas are static configuration; nothing
//! here is inferred from input data.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tally_common::{FieldSpec, FieldType};

/// Descriptor columns shared by the retail extracts, in file order
const RETAIL_DESCRIPTOR_COLUMNS: [&str; 18] = [
    "COD_CENCOSUD",
    "COD_PROVEEDOR",
    "DESCRIPCION_PRODUCTO",
    "MARCA",
    "SECCION",
    "RUBRO",
    "SUBRUBRO",
    "GRUPO",
    "COD_SURTIDO",
    "DESCRIPCION_SURTIDO",
    "COD_LOCAL",
    "TIPO_LOCAL",
    "DESCRIPCION_LOCAL",
    "FORMATO",
    "ZONA",
    "REGION",
    "CIUDAD",
    "DIVISION",
];

fn default_suffix() -> String {
    ".csv".to_string()
}

/// File naming convention: fixed prefix + fixed suffix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingPattern {
    pub prefix: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

impl NamingPattern {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// True when `filename` is `<prefix><token><suffix>` with a non-empty token
    pub fn matches(&self, filename: &str) -> bool {
        filename.len() > self.prefix.len() + self.suffix.len()
            && filename.starts_with(&self.prefix)
            && filename.ends_with(&self.suffix)
    }
}

impl std::fmt::Display for NamingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}*{}", self.prefix, self.suffix)
    }
}

/// Expected layout of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// Logical dataset name (e.g. "sales")
    pub name: String,

    /// Target table in the warehouse dataset
    pub table: String,

    /// Which files in the input folder belong to this dataset
    pub pattern: NamingPattern,

    /// Ordered columns
    pub fields: Vec<FieldSpec>,

    /// Raw source header -> column name rewrites applied before comparison
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

impl DatasetSchema {
    /// Expected header, in order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Check internal consistency
    pub fn check(&self) -> Result<()> {
        let invalid = |reason: &str| IngestError::InvalidSchema {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        crate::config::check_identifier("schema name", &self.name)
            .map_err(|_| invalid("name may only contain letters, digits, '_' and '-'"))?;
        crate::config::check_identifier("table", &self.table)
            .map_err(|_| invalid("table may only contain letters, digits, '_' and '-'"))?;

        if self.pattern.prefix.is_empty() {
            return Err(invalid("naming pattern needs a prefix"));
        }
        if self.fields.is_empty() {
            return Err(invalid("schema has no fields"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("field names must not be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(&format!("duplicate field '{}'", field.name)));
            }
        }
        Ok(())
    }

    /// Weekly/monthly sales extract
    pub fn sales() -> Self {
        let mut fields = vec![FieldSpec::required("PERIODO", FieldType::Date)];
        fields.extend(retail_descriptor_fields());
        fields.extend([
            FieldSpec::required("VENTA_Un", FieldType::Float),
            FieldSpec::required("VENTA_PUBLICO", FieldType::Float),
            FieldSpec::required("CONTRIBUCION", FieldType::Float),
            FieldSpec::required("CANAL_VTA", FieldType::String),
        ]);

        Self {
            name: "sales".to_string(),
            table: "sales".to_string(),
            pattern: NamingPattern::new("sales_", ".csv"),
            fields,
            renames: BTreeMap::from([
                ("VENTA(Un)".to_string(), "VENTA_Un".to_string()),
                ("VENTA_PUBLICO($)".to_string(), "VENTA_PUBLICO".to_string()),
            ]),
        }
    }

    /// Daily product loss (shrinkage) extract
    pub fn product_loss() -> Self {
        let mut fields = vec![FieldSpec::required("DIA", FieldType::Date)];
        fields.extend(retail_descriptor_fields());
        fields.extend([
            FieldSpec::required("MERMA_PERIODO_u", FieldType::Float),
            FieldSpec::required("MERMA_PERIODO_MONTO", FieldType::Float),
        ]);

        Self {
            name: "product_loss".to_string(),
            table: "product_loss".to_string(),
            pattern: NamingPattern::new("product_loss_", ".csv"),
            fields,
            renames: BTreeMap::from([
                ("MERMA_PERIODO(u)".to_string(), "MERMA_PERIODO_u".to_string()),
                (
                    "MERMA_PERIODO_MONTO($)".to_string(),
                    "MERMA_PERIODO_MONTO".to_string(),
                ),
            ]),
        }
    }
}

fn retail_descriptor_fields() -> impl Iterator<Item = FieldSpec> {
    RETAIL_DESCRIPTOR_COLUMNS.into_iter().map(|name| {
        if name == "COD_PROVEEDOR" {
            FieldSpec::nullable(name, FieldType::String)
        } else {
            FieldSpec::required(name, FieldType::String)
        }
    })
}

/// Lookup of dataset schemas by name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, DatasetSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `sales` and `product_loss` schemas
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.schemas.insert("sales".into(), DatasetSchema::sales());
        registry
            .schemas
            .insert("product_loss".into(), DatasetSchema::product_loss());
        registry
    }

    /// Add a schema, replacing any schema with the same name
    pub fn register(&mut self, schema: DatasetSchema) -> Result<()> {
        schema.check()?;
        if let Some(clash) = self
            .schemas
            .values()
            .find(|s| s.name != schema.name && s.pattern == schema.pattern)
        {
            return Err(IngestError::InvalidSchema {
                name: schema.name.clone(),
                reason: format!("naming pattern {} already used by '{}'", schema.pattern, clash.name),
            });
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Merge schemas from a YAML list
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("cannot read schemas file '{}': {}", path.display(), e))
        })?;
        self.load_yaml_str(&content)
    }

    pub fn load_yaml_str(&mut self, content: &str) -> Result<usize> {
        let schemas: Vec<DatasetSchema> = serde_yaml::from_str(content)?;
        let count = schemas.len();
        for schema in schemas {
            tracing::debug!(schema = %schema.name, pattern = %schema.pattern, "Registering schema");
            self.register(schema)?;
        }
        Ok(count)
    }

    pub fn schema_for(&self, name: &str) -> Result<&DatasetSchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| IngestError::SchemaNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
