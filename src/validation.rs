//! Input validation for tabula
//!
//! Two gates live here:
//! - identifier validation for table and column names
//! - the document validator every entry write passes through
//!
//! Document validation never stops at the first problem; every field-keyed
//! message is collected so a caller can report them all at once.

use crate::schema::{Column, ColumnType, Table};
use crate::storage::document::{Document, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identifier validation errors
#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("Invalid identifier '{0}': {1}")]
    InvalidIdentifier(String, &'static str),

    #[error("Identifier '{0}' is too long (max {1} characters)")]
    TooLong(String, usize),

    #[error("Identifier '{0}' does not contain any letters or digits")]
    Empty(String),

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

/// Maximum length of a column internal name
pub const MAX_COLUMN_NAME_LENGTH: usize = 50;

/// Maximum length of a table or database name
pub const MAX_TABLE_NAME_LENGTH: usize = 255;

/// Names that collide with entry attributes or list parameters
const RESERVED_COLUMN_NAMES: &[&str] = &[
    "id", "date_created", "table", "q", "fields", "page", "page_size", "ordering", "format",
];

pub const REQUIRED_MESSAGE: &str = "This field is required";
pub const UNIQUE_MESSAGE: &str = "Value must be unique";
pub const INVALID_INT_MESSAGE: &str = "Integer is not valid";
pub const INVALID_FLOAT_MESSAGE: &str = "Float is not valid";
pub const INVALID_DATE_MESSAGE: &str = "Invalid date format";

/// Validate a column internal name
///
/// Rules:
/// - Must contain at least one letter or digit
/// - At most 50 characters
/// - Lowercase ASCII letters, digits and single underscores only
/// - Cannot be a reserved name
pub fn validate_column_name(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty(name.to_string()));
    }

    if name.len() > MAX_COLUMN_NAME_LENGTH {
        return Err(IdentifierError::TooLong(name.to_string(), MAX_COLUMN_NAME_LENGTH));
    }

    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_' {
            return Err(IdentifierError::InvalidIdentifier(
                name.to_string(),
                "contains invalid characters (only lowercase letters, digits and underscore allowed)",
            ));
        }
    }

    if name.starts_with('_') || name.ends_with('_') || name.contains("__") {
        return Err(IdentifierError::InvalidIdentifier(
            name.to_string(),
            "underscores must separate words",
        ));
    }

    if RESERVED_COLUMN_NAMES.contains(&name) {
        return Err(IdentifierError::Reserved(name.to_string()));
    }

    Ok(())
}

/// Validate a human-entered table or database name
pub fn validate_table_name(name: &str) -> Result<(), IdentifierError> {
    let trimmed = name.trim();
    if !trimmed.chars().any(char::is_alphanumeric) {
        return Err(IdentifierError::Empty(name.to_string()));
    }

    if trimmed.chars().count() > MAX_TABLE_NAME_LENGTH {
        return Err(IdentifierError::TooLong(name.to_string(), MAX_TABLE_NAME_LENGTH));
    }

    if trimmed.chars().any(char::is_control) {
        return Err(IdentifierError::InvalidIdentifier(
            name.to_string(),
            "contains control characters",
        ));
    }

    Ok(())
}

/// Field-keyed validation failures for one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors {
    /// Keys that are not columns of the table
    pub unknown: Vec<String>,
    /// Column internal name -> message
    pub fields: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.unknown.is_empty() && self.fields.is_empty()
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.insert(field.into(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Flat map form; unknown keys are reported under `non_field_errors`
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.fields.clone();
        if !self.unknown.is_empty() {
            map.insert(
                "non_field_errors".to_string(),
                format!("Unknown field(s): {}", self.unknown.join(", ")),
            );
        }
        map
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .to_map()
            .into_iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Check `input` against the columns of `table`
///
/// Returns the document to persist: the same keys as `input`, with each
/// value coerced to its column's type.
pub fn validate_document(table: &Table, input: &Document) -> Result<Document, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut output = Document::new();

    for (key, value) in input {
        match table.column(key) {
            None => errors.unknown.push(key.clone()),
            Some(column) => match coerce_value(column, value) {
                Ok(coerced) => {
                    output.insert(key.clone(), coerced);
                }
                Err(message) => errors.insert(key.clone(), message),
            },
        }
    }

    for column in table.columns.iter().filter(|c| c.required) {
        let missing = input.get(&column.name).map(Value::is_empty).unwrap_or(true);
        if missing {
            errors.insert(column.name.clone(), REQUIRED_MESSAGE);
        }
    }

    errors.into_result(output)
}

/// Coerce one value to the type of `column`
///
/// Empty values of typed columns become null; text and object values are
/// kept verbatim.
pub fn coerce_value(column: &Column, value: &Value) -> Result<Value, String> {
    if value.is_empty() && !matches!(column.field_type, ColumnType::Text | ColumnType::Object) {
        return Ok(Value::Null);
    }

    match column.field_type {
        ColumnType::Int => coerce_int(value).ok_or_else(|| INVALID_INT_MESSAGE.to_string()),
        ColumnType::Float => coerce_float(value).ok_or_else(|| INVALID_FLOAT_MESSAGE.to_string()),
        ColumnType::Date => value
            .as_datetime()
            .map(Value::Date)
            .ok_or_else(|| INVALID_DATE_MESSAGE.to_string()),
        ColumnType::Bool => Ok(Value::Bool(truthy(value))),
        ColumnType::Enum => {
            let text = value.to_text();
            if column.choices.contains(&text) {
                Ok(Value::String(text))
            } else {
                Err(format!(
                    "{} is not a valid choice({})",
                    text,
                    column.choices_display()
                ))
            }
        }
        ColumnType::Text | ColumnType::Object => Ok(value.clone()),
    }
}

fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(Value::Int(*f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<Value> {
    match value {
        Value::Int(_) | Value::Float(_) | Value::String(_) => value.to_number().map(Value::Float),
        _ => None,
    }
}

/// Boolean-like reading of any value
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "" | "0" | "false" | "f" | "no" | "n" | "off"
        ),
        Value::Date(_) => true,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;
    use crate::storage::document::document;
    use chrono::Utc;

    fn people() -> Table {
        Table {
            id: 1,
            name: "People".into(),
            slug: "people".into(),
            database: 1,
            active: true,
            date_created: Utc::now(),
            owner: "ana".into(),
            last_edit_date: Utc::now(),
            last_edit_user: "ana".into(),
            columns: vec![
                ColumnSpec::new("Name", ColumnType::Text).required().into_column(),
                ColumnSpec::new("Age", ColumnType::Int).into_column(),
                ColumnSpec::new("Score", ColumnType::Float).into_column(),
                ColumnSpec::new("Born", ColumnType::Date).into_column(),
                ColumnSpec::new("Active", ColumnType::Bool).into_column(),
                ColumnSpec::new("Status", ColumnType::Enum)
                    .choices(["open", "closed"])
                    .into_column(),
            ],
        }
    }

    #[test]
    fn test_valid_column_names() {
        assert!(validate_column_name("full_name").is_ok());
        assert!(validate_column_name("a1").is_ok());
        assert!(validate_column_name("2020_total").is_ok());
    }

    #[test]
    fn test_invalid_column_names() {
        assert!(matches!(validate_column_name(""), Err(IdentifierError::Empty(_))));
        assert!(validate_column_name("Full Name").is_err());
        assert!(validate_column_name("_hidden").is_err());
        assert!(validate_column_name("a__b").is_err());
        assert!(matches!(validate_column_name("id"), Err(IdentifierError::Reserved(_))));
        let long_name = "a".repeat(51);
        assert!(matches!(validate_column_name(&long_name), Err(IdentifierError::TooLong(_, 50))));
    }

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("Vânzări 2020").is_ok());
        assert!(validate_table_name("   ").is_err());
        assert!(validate_table_name("--").is_err());
        assert!(validate_table_name("bad\nname").is_err());
    }

    #[test]
    fn test_valid_document_is_coerced() {
        let input = document([
            ("name", Value::from("Ana")),
            ("age", Value::from("42")),
            ("score", Value::from(7i64)),
            ("born", Value::from("1990-05-01")),
            ("active", Value::from("yes")),
            ("status", Value::from("open")),
        ]);
        let doc = validate_document(&people(), &input).unwrap();

        assert_eq!(doc.get("age"), Some(&Value::Int(42)));
        assert_eq!(doc.get("score"), Some(&Value::Float(7.0)));
        assert!(matches!(doc.get("born"), Some(Value::Date(_))));
        assert_eq!(doc.get("active"), Some(&Value::Bool(true)));
        assert_eq!(doc.len(), input.len());
    }

    #[test]
    fn test_all_errors_are_collected() {
        let input = document([
            ("age", Value::from("x")),
            ("score", Value::from("1,5")),
            ("born", Value::from("yesterday")),
            ("status", Value::from("pending")),
            ("colour", Value::from("red")),
        ]);
        let errors = validate_document(&people(), &input).unwrap_err();

        assert_eq!(errors.unknown, vec!["colour".to_string()]);
        assert_eq!(errors.get("name"), Some(REQUIRED_MESSAGE));
        assert_eq!(errors.get("age"), Some(INVALID_INT_MESSAGE));
        assert_eq!(errors.get("score"), Some(INVALID_FLOAT_MESSAGE));
        assert_eq!(errors.get("born"), Some(INVALID_DATE_MESSAGE));
        assert_eq!(
            errors.get("status"),
            Some("pending is not a valid choice(closed,open)")
        );
        assert_eq!(
            errors.to_map().get("non_field_errors").map(String::as_str),
            Some("Unknown field(s): colour")
        );
    }

    #[test]
    fn test_blank_required_value_is_missing() {
        let input = document([("name", "   ")]);
        let errors = validate_document(&people(), &input).unwrap_err();
        assert_eq!(errors.get("name"), Some(REQUIRED_MESSAGE));
    }

    #[test]
    fn test_empty_optional_typed_value_becomes_null() {
        let input = document([("name", Value::from("Ana")), ("age", Value::from(""))]);
        let doc = validate_document(&people(), &input).unwrap();
        assert_eq!(doc.get("age"), Some(&Value::Null));
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&Value::from("True")));
        assert!(!truthy(&Value::from("off")));
        assert!(!truthy(&Value::Int(0)));
        assert!(truthy(&Value::Float(0.5)));
    }
}
