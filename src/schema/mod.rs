//! Schema definitions for tabula
//!
//! A schema is a tree of user-defined objects:
//! - Databases group tables
//! - Tables own an ordered list of typed columns
//! - Columns type the keys of every entry document in their table
//!
//! Definitions live in the [`catalog::Catalog`], stored under
//! `/.tabula/catalog/{kind}/{id}.yaml` for file-backed engines.

pub mod catalog;
pub mod migration;
pub mod naming;
pub mod tables;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use catalog::Catalog;
pub use naming::{normalize_name, slugify};

/// Identifier of a database
pub type DatabaseId = u64;

/// Identifier of a table
pub type TableId = u64;

/// The closed set of column types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    #[default]
    Text,
    Date,
    Bool,
    Object,
    Enum,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Bool => "bool",
            ColumnType::Object => "object",
            ColumnType::Enum => "enum",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" => Ok(ColumnType::Int),
            "float" => Ok(ColumnType::Float),
            "text" | "string" => Ok(ColumnType::Text),
            "date" => Ok(ColumnType::Date),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "object" => Ok(ColumnType::Object),
            "enum" => Ok(ColumnType::Enum),
            other => Err(format!("unknown column type '{}'", other)),
        }
    }
}

/// Definition of a single column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    /// Internal name; the document key
    pub name: String,
    /// Human-readable label
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: ColumnType,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    /// Allowed values, only meaningful for `enum` columns
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub choices: BTreeSet<String>,
}

impl Column {
    /// Union `values` into the choice set, returning how many were new
    pub fn merge_choices<I, S>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.choices.len();
        self.choices.extend(values.into_iter().map(Into::into));
        self.choices.len() - before
    }

    /// Choices joined the way validation messages list them
    pub fn choices_display(&self) -> String {
        self.choices.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// A user-defined table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub slug: String,
    pub database: DatabaseId,
    #[serde(default = "default_active")]
    pub active: bool,
    pub date_created: DateTime<Utc>,
    pub owner: String,
    pub last_edit_date: DateTime<Utc>,
    pub last_edit_user: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

fn default_active() -> bool {
    true
}

impl Table {
    /// Get a column by internal name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Internal names in declaration order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Record a write attributable to `user`
    pub fn touch(&mut self, user: &str) {
        self.last_edit_date = Utc::now();
        self.last_edit_user = user.to_string();
    }
}

/// A named group of tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Database {
    pub id: DatabaseId,
    pub name: String,
    pub slug: String,
    pub date_created: DateTime<Utc>,
}

/// Column declaration used when creating or editing a table
///
/// Only the display name and type are mandatory; the internal name is
/// derived with [`normalize_name`] unless set explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ColumnSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub field_type: ColumnType,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub choices: BTreeSet<String>,
}

impl ColumnSpec {
    pub fn new(display_name: impl Into<String>, field_type: ColumnType) -> Self {
        Self {
            display_name: display_name.into(),
            field_type,
            ..Default::default()
        }
    }

    /// Set the internal name explicitly
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn choices<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = values.into_iter().map(Into::into).collect();
        self
    }

    /// The internal name this spec resolves to
    pub fn internal_name(&self) -> String {
        match &self.name {
            Some(name) => normalize_name(name),
            None => normalize_name(&self.display_name),
        }
    }

    /// Build the column definition
    pub fn into_column(self) -> Column {
        let name = self.internal_name();
        Column {
            name,
            display_name: self.display_name,
            field_type: self.field_type,
            help_text: self.help_text,
            required: self.required,
            unique: self.unique,
            choices: self.choices,
        }
    }
}

/// Structural change to one column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnChange {
    Add(ColumnSpec),
    /// Edit `column`; an explicit `spec.name` renames it (a data migration)
    Edit { column: String, spec: ColumnSpec },
    Remove(String),
}

/// Partial update of a table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub columns: Vec<ColumnChange>,
}

impl TableUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn archive() -> Self {
        Self {
            active: Some(false),
            ..Default::default()
        }
    }

    pub fn with_change(mut self, change: ColumnChange) -> Self {
        self.columns.push(change);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_parsing() {
        assert_eq!("int".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("Boolean".parse::<ColumnType>().unwrap(), ColumnType::Bool);
        assert!("money".parse::<ColumnType>().is_err());
        assert_eq!(ColumnType::Enum.to_string(), "enum");
    }

    #[test]
    fn test_column_spec_derives_internal_name() {
        let column = ColumnSpec::new("Data Nașterii", ColumnType::Date)
            .required()
            .into_column();
        assert_eq!(column.name, "data_nasterii");
        assert_eq!(column.display_name, "Data Nașterii");
        assert!(column.required);

        let column = ColumnSpec::new("Label", ColumnType::Text).named("code").into_column();
        assert_eq!(column.name, "code");
    }

    #[test]
    fn test_merge_choices_is_a_set_union() {
        let mut column = ColumnSpec::new("Status", ColumnType::Enum)
            .choices(["open"])
            .into_column();
        assert_eq!(column.merge_choices(["open", "closed", "closed"]), 1);
        assert_eq!(column.merge_choices(["open"]), 0);
        assert_eq!(column.choices_display(), "closed,open");
    }

    #[test]
    fn test_column_yaml_shape() {
        let column = ColumnSpec::new("Age", ColumnType::Int).into_column();
        let yaml = serde_yaml::to_string(&column).unwrap();
        assert!(yaml.contains("type: int"));
        let back: Column = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, column);
    }
}
