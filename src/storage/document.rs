//! Entry documents
//!
//! An Entry is one row of a user-defined table. Its data is a single
//! document: a map from column internal name to a dynamic scalar value.
//! The document is not typed by the storage layer; values are checked
//! against the owning table's columns at the engine boundary.

use crate::schema::TableId;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Identifier of an entry, unique across the store
pub type EntryId = u64;

/// Canonical text form of a date value
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A map of column internal names to values
pub type Document = BTreeMap<String, Value>;

/// Values that can be stored in a document
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Timezone-less timestamp; stored as ISO-8601 text
    Date(NaiveDateTime),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Null and blank strings count as "no value" for required checks
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value, parsing numeric text
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Timestamp view of the value, parsing ISO-8601 text
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            Value::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Plain text rendering used for CSV cells, chart labels and
    /// string comparisons
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
        }
    }

    /// Key under which two values are considered equal for joins and
    /// batched lookups. Integral floats join with integers; dates join
    /// with their stored text form. Nulls never join.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(format!("b:{}", b)),
            Value::Int(i) => Some(format!("n:{}", i)),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some(format!("n:{}", *f as i64))
                } else {
                    Some(format!("n:{}", f))
                }
            }
            Value::String(s) => Some(format!("s:{}", s)),
            Value::Date(_) => Some(format!("s:{}", self.to_text())),
            Value::Array(_) | Value::Object(_) => Some(format!("j:{}", self.to_json())),
        }
    }

    /// Check if this value matches a LIKE pattern (`%` any run, `_` one char)
    pub fn matches_pattern(&self, pattern: &str, case_insensitive: bool) -> bool {
        let text = match self {
            Value::Null => return false,
            other => other.to_text(),
        };

        let mut regex_pattern = String::from(if case_insensitive { "(?si)^" } else { "(?s)^" });
        for c in pattern.chars() {
            match c {
                '%' => regex_pattern.push_str(".*"),
                '_' => regex_pattern.push('.'),
                other => regex_pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex_pattern.push('$');

        regex::Regex::new(&regex_pattern)
            .map(|r| r.is_match(&text))
            .unwrap_or(false)
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(_) => serde_json::Value::String(self.to_text()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(obj) => serde_json::Value::Object(
                obj.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

/// Parse ISO-8601 date or date-time text. Offsets are normalized to UTC.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.naive_utc());
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// One row of a table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    /// Owning table
    pub table: TableId,
    pub date_created: DateTime<Utc>,
    /// Column internal name -> value
    pub data: Document,
}

impl Entry {
    /// Get a document value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Build a document from `(key, value)` pairs
pub fn document<K, V, I>(pairs: I) -> Document
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion_keeps_numbers_apart() {
        let json = serde_json::json!({"a": 1, "b": 1.5, "c": "x", "d": null, "e": [true]});
        let doc: Document = serde_json::from_value(json).unwrap();

        assert_eq!(doc.get("a"), Some(&Value::Int(1)));
        assert_eq!(doc.get("b"), Some(&Value::Float(1.5)));
        assert_eq!(doc.get("c"), Some(&Value::String("x".into())));
        assert_eq!(doc.get("d"), Some(&Value::Null));
        assert_eq!(doc.get("e"), Some(&Value::Array(vec![Value::Bool(true)])));
    }

    #[test]
    fn test_dates_serialize_as_iso_text() {
        let date = parse_datetime("2020-03-04 05:06:07").unwrap();
        let value = Value::Date(date);
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"2020-03-04T05:06:07\"");
        assert_eq!(value.join_key(), Value::from("2020-03-04T05:06:07").join_key());
    }

    #[test]
    fn test_parse_datetime_variants() {
        let expected = NaiveDate::from_ymd_opt(2021, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parse_datetime("2021-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_datetime("2021-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_datetime("2021-01-02T03:04:05Z"), Some(expected));
        assert_eq!(
            parse_datetime("2021-01-02"),
            NaiveDate::from_ymd_opt(2021, 1, 2).map(|d| d.and_time(NaiveTime::MIN))
        );
        assert_eq!(parse_datetime("02/01/2021"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn test_join_key_unifies_integral_numbers() {
        assert_eq!(Value::Int(5).join_key(), Value::Float(5.0).join_key());
        assert_ne!(Value::Int(5).join_key(), Value::from("5").join_key());
        assert_eq!(Value::Null.join_key(), None);
    }

    #[test]
    fn test_like_patterns_escape_regex() {
        let v = Value::from("a.b@example.org");
        assert!(v.matches_pattern("%@example.org", false));
        assert!(!v.matches_pattern("a_b@EXAMPLE.org", false));
        assert!(v.matches_pattern("a_b@EXAMPLE.org", true));
        assert!(!Value::from("axb").matches_pattern("a.b", false));
    }

    #[test]
    fn test_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("  ").is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::Bool(false).is_empty());
    }
}
