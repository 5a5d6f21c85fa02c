//! Entry queries for tabula
//!
//! Field filters, `tql` predicates, ordering, pagination and field
//! projection over the entries of one table, plus the validated entry
//! writes.

mod executor;
pub mod filter;
pub mod predicate;

pub(crate) use executor::{check_unique, create_entry, delete_entry, get_entry, list_entries, scan_matching, update_entry};
pub use filter::{CompiledFilters, FieldFilters, Lookup};
pub use predicate::Predicate;

use crate::storage::document::{Document, Entry, Value};
use crate::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;

/// Which page of a result to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: usize,
    /// Falls back to the configured page size
    pub page_size: Option<usize>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: None }
    }
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size: Some(page_size),
        }
    }

    /// `(offset, size)` of this page
    pub(crate) fn bounds(&self, default_size: usize) -> (usize, usize) {
        let size = self.page_size.unwrap_or(default_size).max(1);
        let page = self.page.max(1);
        ((page - 1) * size, size)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    /// Total number of results across all pages
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Cut one page out of a complete, ordered result list
    pub fn from_vec(items: Vec<T>, request: PageRequest, default_size: usize) -> Self {
        let (offset, size) = request.bounds(default_size);
        let count = items.len();
        let results = items.into_iter().skip(offset).take(size).collect();
        Self {
            count,
            page: request.page.max(1),
            page_size: size,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// Parameters of an entry listing
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filters: FieldFilters,
    /// Free-form `tql` predicate
    pub q: Option<String>,
    /// Field projection; all columns when unset
    pub fields: Option<Vec<String>>,
    /// Ordering keys such as `"-age,name"`
    pub ordering: Option<String>,
    pub page: PageRequest,
}

/// Sort keys parsed from `"-age,name"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    keys: Vec<(String, bool)>,
}

impl OrderBy {
    /// Parse comma-separated keys; a leading `-` sorts descending
    pub fn parse(spec: &str) -> Self {
        let keys = spec
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| match k.strip_prefix('-') {
                Some(field) => (field.to_string(), true),
                None => (k.to_string(), false),
            })
            .collect();
        Self { keys }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(f, _)| f.as_str())
    }

    /// Compare two entries; ties fall back to ascending id
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        for (field, descending) in &self.keys {
            let cmp = match field.as_str() {
                "id" => a.id.cmp(&b.id),
                "date_created" => a.date_created.cmp(&b.date_created),
                _ => compare_sort_values(a.get(field), b.get(field)),
            };
            if cmp != Ordering::Equal {
                return if *descending { cmp.reverse() } else { cmp };
            }
        }
        a.id.cmp(&b.id)
    }
}

/// Total order used for sorting: missing and null values first
pub(crate) fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !matches!(v, Value::Null));
    let b = b.filter(|v| !matches!(v, Value::Null));
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a
                .to_number()
                .partial_cmp(&b.to_number())
                .unwrap_or(Ordering::Equal),
            (Value::Date(x), Value::Date(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => a.to_text().cmp(&b.to_text()),
        },
    }
}

/// Keep only `fields` of a document
pub fn project(doc: &Document, fields: Option<&[String]>) -> Document {
    match fields {
        None => doc.clone(),
        Some(fields) => fields
            .iter()
            .filter_map(|f| doc.get(f).map(|v| (f.clone(), v.clone())))
            .collect(),
    }
}

/// Fail with `UnknownFieldReference` unless every name is accepted
pub(crate) fn check_fields<'a>(
    table: &str,
    names: impl IntoIterator<Item = &'a str>,
    known: impl Fn(&str) -> bool,
) -> Result<()> {
    let unknown: Vec<String> = names
        .into_iter()
        .filter(|n| !known(n))
        .map(str::to_string)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::UnknownFieldReference {
            table: table.to_string(),
            fields: unknown,
        })
    }
}
