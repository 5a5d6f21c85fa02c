//! Error types for tabula
//!
//! Every failure the engine surfaces maps onto one of a few categories
//! (schema, validation, join configuration, chart configuration,
//! predicate parsing, storage). None of them are retried by the engine.

use crate::schema::ColumnType;
use crate::storage::EntryId;
use crate::validation::FieldErrors;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tabula operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    #[error("Database '{name}' does not exist")]
    DatabaseNotFound { name: String },

    #[error("Table '{table}' does not exist")]
    TableNotFound { table: String },

    #[error("Column '{column}' does not exist in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("{kind} '{name}' already exists in {scope}")]
    NameConflict {
        kind: &'static str,
        name: String,
        scope: String,
    },

    #[error("Unknown field(s) in table '{table}': {}", .fields.join(", "))]
    UnknownFieldReference { table: String, fields: Vec<String> },

    #[error("Cannot change type of column '{column}' in table '{table}' from {from} to {to}: the table has entries")]
    FieldTypeChangeRejected {
        table: String,
        column: String,
        from: ColumnType,
        to: ColumnType,
    },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Reserved name '{name}' cannot be used")]
    ReservedName { name: String },

    #[error("Column '{column}' of table '{table}' is still used by {}", .used_by.join(", "))]
    ColumnInUse {
        table: String,
        column: String,
        used_by: Vec<String>,
    },

    #[error("Migration of column '{column}' in table '{table}' incomplete: {migrated} migrated, {} failed", .failed.len())]
    MigrationIncomplete {
        table: String,
        column: String,
        migrated: usize,
        failed: Vec<(EntryId, String)>,
    },

    // ==========================================================================
    // Entry / Object Lookup Errors
    // ==========================================================================
    #[error("Entry {id} not found in table '{table}'")]
    EntryNotFound { table: String, id: EntryId },

    #[error("Filter {id} does not exist")]
    FilterNotFound { id: u64 },

    #[error("Chart {id} does not exist")]
    ChartNotFound { id: u64 },

    #[error("CSV import {id} does not exist")]
    ImportNotFound { id: u64 },

    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Invalid filter configuration: {message}")]
    JoinConfiguration { message: String },

    #[error("Invalid chart configuration: {message}")]
    ChartConfiguration { message: String },

    #[error("Predicate parse error: {message}")]
    ParseError { message: String },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    #[error("Failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {message}")]
    YamlParseError { message: String },

    #[error("Failed to parse JSON: {message}")]
    JsonParseError { message: String },

    #[error("CSV error: {message}")]
    CsvError { message: String },

    // ==========================================================================
    // Catch-all
    // ==========================================================================
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tabula operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse grouping of errors, mirroring who has to act on them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Schema,
    Validation,
    JoinConfiguration,
    ChartConfiguration,
    Predicate,
    Storage,
}

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlParseError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParseError {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::CsvError {
            message: err.to_string(),
        }
    }
}

impl From<tql::ParseError> for Error {
    fn from(err: tql::ParseError) -> Self {
        Error::ParseError {
            message: err.to_string(),
        }
    }
}

impl From<FieldErrors> for Error {
    fn from(errors: FieldErrors) -> Self {
        Error::Validation(errors)
    }
}

impl From<crate::validation::IdentifierError> for Error {
    fn from(err: crate::validation::IdentifierError) -> Self {
        use crate::validation::IdentifierError;
        match err {
            IdentifierError::InvalidIdentifier(value, reason) => Error::InvalidIdentifier {
                kind: "name",
                value,
                reason,
            },
            IdentifierError::TooLong(value, _max) => Error::InvalidIdentifier {
                kind: "name",
                value,
                reason: "exceeds maximum length",
            },
            IdentifierError::Empty(value) => Error::InvalidIdentifier {
                kind: "name",
                value,
                reason: "does not contain any letters or digits",
            },
            IdentifierError::Reserved(name) => Error::ReservedName { name },
        }
    }
}

// =============================================================================
// Error Display Helpers
// =============================================================================

impl Error {
    /// Which part of the engine rejected the request
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::JoinConfiguration { .. } => ErrorCategory::JoinConfiguration,
            Error::ChartConfiguration { .. } => ErrorCategory::ChartConfiguration,
            Error::ParseError { .. } => ErrorCategory::Predicate,
            Error::FileReadError { .. }
            | Error::FileWriteError { .. }
            | Error::Io(_)
            | Error::YamlParseError { .. }
            | Error::JsonParseError { .. }
            | Error::CsvError { .. }
            | Error::Other(_) => ErrorCategory::Storage,
            _ => ErrorCategory::Schema,
        }
    }

    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::NameConflict { .. } => Some("Pick a different name"),
            Error::FieldTypeChangeRejected { .. } => {
                Some("Add a new column with the desired type and copy the data over")
            }
            Error::InvalidIdentifier { .. } => {
                Some("Use a name containing at least one letter or digit")
            }
            Error::Validation(_) => Some("Fix the listed fields and resubmit the entry"),
            Error::ColumnInUse { .. } => {
                Some("Unbind the column from the listed filters and charts first")
            }
            Error::MigrationIncomplete { .. } => Some(
                "Column changes before this one are already saved; re-run the remaining changes and migrated entries are skipped",
            ),
            Error::ChartConfiguration { .. } => {
                Some("Check the chart's timeline, axis and period settings")
            }
            _ => None,
        }
    }

    /// Returns true if the caller can fix the request and try again
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Storage)
    }

    /// Field-keyed messages when this is a validation failure
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Error::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableNotFound {
            table: "sales".to_string(),
        };
        assert_eq!(err.to_string(), "Table 'sales' does not exist");

        let err = Error::UnknownFieldReference {
            table: "sales".to_string(),
            fields: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Unknown field(s) in table 'sales': a, b");
    }

    #[test]
    fn test_error_category() {
        let err = Error::ChartConfiguration {
            message: "missing period".into(),
        };
        assert_eq!(err.category(), ErrorCategory::ChartConfiguration);
        assert!(err.suggestion().is_some());
        assert!(err.is_recoverable());

        let err = Error::Other("disk on fire".into());
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(!err.is_recoverable());
    }
}
