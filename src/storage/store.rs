//! The entry store contract
//!
//! Every read or write of entry documents goes through this trait. Reads
//! of a whole table are always paged (`scan`), and lookups of many rows
//! by a field value are a single call (`find_by_values`).

use super::document::{Document, Entry, EntryId, Value};
use crate::schema::TableId;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Create an entry and assign it an id
    async fn insert(&self, table: TableId, data: Document) -> Result<Entry>;

    /// Fetch one entry
    async fn get(&self, table: TableId, id: EntryId) -> Result<Option<Entry>>;

    /// Overwrite the document of an existing entry
    async fn replace(&self, entry: &Entry) -> Result<()>;

    /// Remove an entry, returning whether it existed
    async fn delete(&self, table: TableId, id: EntryId) -> Result<bool>;

    /// Up to `limit` entries with id greater than `after`, ascending by id
    async fn scan(&self, table: TableId, after: Option<EntryId>, limit: usize) -> Result<Vec<Entry>>;

    /// Every entry whose `field` value joins with one of `values`
    async fn find_by_values(&self, table: TableId, field: &str, values: &[Value]) -> Result<Vec<Entry>>;

    /// Number of entries in a table
    async fn count(&self, table: TableId) -> Result<usize>;

    /// Drop every entry of a table, returning how many were removed
    async fn purge_table(&self, table: TableId) -> Result<usize>;
}

/// Join keys of `values`, for membership tests in store implementations
pub(crate) fn key_set(values: &[Value]) -> std::collections::HashSet<String> {
    values.iter().filter_map(Value::join_key).collect()
}

/// Whether `entry[field]` joins with one of `keys`
pub(crate) fn entry_matches(entry: &Entry, field: &str, keys: &std::collections::HashSet<String>) -> bool {
    entry
        .get(field)
        .and_then(Value::join_key)
        .map(|k| keys.contains(&k))
        .unwrap_or(false)
}
