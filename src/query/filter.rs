//! Field filters
//!
//! Request-style `key=value` filters over entry documents. A key is either
//! `field` or `field__lookup`; values are coerced by the target column's
//! type, so numeric columns compare numerically and everything else as
//! text. A comma in an exact-match value expands to an `in` match.
//! Keys whose field part is not a column are ignored.

use crate::schema::{ColumnType, Table};
use crate::storage::document::{parse_datetime, Document, Value};
use crate::validation::truthy;
use chrono::NaiveDateTime;
use std::cmp::Ordering;

/// Supported lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IContains,
}

impl Lookup {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Lookup::Exact),
            "in" => Some(Lookup::In),
            "gt" => Some(Lookup::Gt),
            "gte" => Some(Lookup::Gte),
            "lt" => Some(Lookup::Lt),
            "lte" => Some(Lookup::Lte),
            "contains" => Some(Lookup::Contains),
            "icontains" => Some(Lookup::IContains),
            _ => None,
        }
    }
}

/// Raw filters as received from a caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilters {
    pairs: Vec<(String, String)>,
}

impl FieldFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` filter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Parse `key=value` arguments, as given on a command line
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Option<Self> {
        let mut filters = Self::new();
        for arg in args {
            let (key, value) = arg.as_ref().split_once('=')?;
            filters = filters.with(key.trim(), value.trim());
        }
        Some(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Resolve against `table`'s columns
    pub fn compile(&self, table: &Table) -> CompiledFilters {
        let mut conditions = Vec::new();

        for (key, raw) in &self.pairs {
            let (field, lookup) = match key.rsplit_once("__") {
                Some((field, suffix)) => match Lookup::parse(suffix) {
                    Some(lookup) => (field, lookup),
                    None => (key.as_str(), Lookup::Exact),
                },
                None => (key.as_str(), Lookup::Exact),
            };

            let Some(column) = table.column(field) else {
                tracing::debug!(table = %table.slug, key = %key, "ignoring filter on unknown field");
                continue;
            };

            let lookup = if lookup == Lookup::Exact && raw.contains(',') {
                Lookup::In
            } else {
                lookup
            };

            let operands = match lookup {
                Lookup::In => raw.split(',').map(|v| Operand::parse(column.field_type, v.trim())).collect(),
                Lookup::Contains | Lookup::IContains => vec![Some(Operand::Text(raw.clone()))],
                _ => vec![Operand::parse(column.field_type, raw.trim())],
            };

            conditions.push(Condition {
                field: field.to_string(),
                column_type: column.field_type,
                lookup,
                operands: operands.into_iter().flatten().collect(),
            });
        }

        CompiledFilters { conditions }
    }
}

/// A typed comparison operand
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Date(NaiveDateTime),
    Bool(bool),
    Text(String),
}

impl Operand {
    /// Coerce filter text by column type; `None` when it cannot match
    fn parse(column_type: ColumnType, raw: &str) -> Option<Self> {
        match column_type {
            ColumnType::Int | ColumnType::Float => raw.parse::<f64>().ok().map(Operand::Number),
            ColumnType::Date => parse_datetime(raw).map(Operand::Date),
            ColumnType::Bool => Some(Operand::Bool(truthy(&Value::from(raw)))),
            _ => Some(Operand::Text(raw.to_string())),
        }
    }

    /// View of a stored value under the same coercion
    fn of(column_type: ColumnType, value: &Value) -> Option<Self> {
        if matches!(value, Value::Null) {
            return None;
        }
        match column_type {
            ColumnType::Int | ColumnType::Float => value.to_number().map(Operand::Number),
            ColumnType::Date => value.as_datetime().map(Operand::Date),
            ColumnType::Bool => Some(Operand::Bool(truthy(value))),
            _ => Some(Operand::Text(value.to_text())),
        }
    }

    fn compare(&self, other: &Operand) -> Option<Ordering> {
        match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(b),
            (Operand::Date(a), Operand::Date(b)) => Some(a.cmp(b)),
            (Operand::Bool(a), Operand::Bool(b)) => Some(a.cmp(b)),
            (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn text(&self) -> String {
        match self {
            Operand::Number(n) => n.to_string(),
            Operand::Date(d) => d.format(crate::storage::document::DATE_FORMAT).to_string(),
            Operand::Bool(b) => b.to_string(),
            Operand::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    column_type: ColumnType,
    lookup: Lookup,
    operands: Vec<Operand>,
}

impl Condition {
    fn matches(&self, doc: &Document) -> bool {
        let Some(value) = doc.get(&self.field) else {
            return false;
        };

        if matches!(self.lookup, Lookup::Contains | Lookup::IContains) {
            let needle = match self.operands.first() {
                Some(op) => op.text(),
                None => return false,
            };
            let haystack = match value {
                Value::Null => return false,
                other => other.to_text(),
            };
            return if self.lookup == Lookup::IContains {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            } else {
                haystack.contains(&needle)
            };
        }

        let Some(actual) = Operand::of(self.column_type, value) else {
            return false;
        };

        let ordering_matches = |wanted: fn(Ordering) -> bool| {
            self.operands
                .first()
                .and_then(|op| actual.compare(op))
                .map(wanted)
                .unwrap_or(false)
        };

        match self.lookup {
            Lookup::Exact | Lookup::In => self
                .operands
                .iter()
                .any(|op| actual.compare(op) == Some(Ordering::Equal)),
            Lookup::Gt => ordering_matches(|o| o == Ordering::Greater),
            Lookup::Gte => ordering_matches(|o| o != Ordering::Less),
            Lookup::Lt => ordering_matches(|o| o == Ordering::Less),
            Lookup::Lte => ordering_matches(|o| o != Ordering::Greater),
            Lookup::Contains | Lookup::IContains => false,
        }
    }
}

/// Filters resolved against one table
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    conditions: Vec<Condition>,
}

impl CompiledFilters {
    /// Whether every condition holds for `doc`
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
