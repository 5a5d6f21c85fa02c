//! CSV import and export
//!
//! Import is two steps. [`prepare_csv_import`](crate::Engine::prepare_csv_import)
//! keeps the uploaded file and reports the fields it detected;
//! [`run_csv_import`](crate::Engine::run_csv_import) applies a field
//! mapping and creates one entry per valid row. Export writes every
//! matching entry of a table as a delimited row.

mod export;
mod import;
pub mod infer;

pub(crate) use export::{export_csv, write_csv};
pub(crate) use import::{prepare_csv_import, run_csv_import};

use crate::schema::catalog::CatalogObject;
use crate::schema::{ColumnType, DatabaseId, TableId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A field found in the header of an uploaded file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedField {
    /// Header text as it appears in the file
    pub original_name: String,
    /// Cleaned-up label
    pub display_name: String,
    /// Suggested column internal name
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: ColumnType,
    /// strptime-style layout for date fields
    #[serde(default)]
    pub field_format: Option<String>,
}

/// How one file column feeds one table column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    /// Header in the file
    pub original_name: String,
    /// Column label or internal name; normalized to the internal name
    pub field_name: String,
    /// Declared type; defaults to the existing column's type
    #[serde(default)]
    pub field_type: Option<ColumnType>,
    #[serde(default)]
    pub field_format: Option<String>,
    /// Only used when the import creates the table
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn new(original_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            field_name: field_name.into(),
            field_type: None,
            field_format: None,
            required: false,
        }
    }

    pub fn typed(mut self, field_type: ColumnType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.field_format = Some(format.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl From<&DetectedField> for FieldMapping {
    fn from(field: &DetectedField) -> Self {
        Self {
            original_name: field.original_name.clone(),
            field_name: field.display_name.clone(),
            field_type: Some(field.field_type),
            field_format: field.field_format.clone(),
            required: false,
        }
    }
}

/// Where imported rows go
#[derive(Debug, Clone, PartialEq)]
pub enum ImportTarget {
    Existing(TableId),
    /// Create a table whose columns come from the mapping
    New { database: DatabaseId, name: String },
}

/// A rejected row: its raw cells and the field-level messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRowError {
    /// Header -> raw cell text
    pub row: IndexMap<String, String>,
    /// Header -> message
    pub errors: BTreeMap<String, String>,
}

/// Outcome of running an import
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportReport {
    pub table: Option<TableId>,
    pub errors_count: usize,
    pub imports_count: usize,
    pub errors: Vec<ImportRowError>,
}

/// Result of preparing an import
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreparedImport {
    pub import_id: u64,
    pub detected_fields: Vec<DetectedField>,
}

/// A stored import descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CsvImport {
    pub id: u64,
    pub file_name: String,
    pub owner: String,
    pub delimiter: char,
    pub fields: Vec<DetectedField>,
    #[serde(default)]
    pub mapping: Vec<FieldMapping>,
    #[serde(default)]
    pub table: Option<TableId>,
    #[serde(default)]
    pub errors_count: usize,
    #[serde(default)]
    pub imports_count: usize,
    #[serde(default)]
    pub errors: Vec<ImportRowError>,
    pub date_created: DateTime<Utc>,
}

impl CatalogObject for CsvImport {
    const KIND: &'static str = "imports";

    fn id(&self) -> u64 {
        self.id
    }
}
