//! In-memory entry store

use super::document::{Document, Entry, EntryId, Value};
use super::store::{entry_matches, key_set, EntryStore};
use crate::schema::TableId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: EntryId,
    tables: HashMap<TableId, BTreeMap<EntryId, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn insert(&self, table: TableId, data: Document) -> Result<Entry> {
        let mut state = self.inner.write().await;
        state.last_id += 1;
        let entry = Entry {
            id: state.last_id,
            table,
            date_created: Utc::now(),
            data,
        };
        state.tables.entry(table).or_default().insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, table: TableId, id: EntryId) -> Result<Option<Entry>> {
        let state = self.inner.read().await;
        Ok(state.tables.get(&table).and_then(|rows| rows.get(&id)).cloned())
    }

    async fn replace(&self, entry: &Entry) -> Result<()> {
        let mut state = self.inner.write().await;
        match state.tables.get_mut(&entry.table).and_then(|rows| rows.get_mut(&entry.id)) {
            Some(slot) => {
                *slot = entry.clone();
                Ok(())
            }
            None => Err(Error::EntryNotFound {
                table: entry.table.to_string(),
                id: entry.id,
            }),
        }
    }

    async fn delete(&self, table: TableId, id: EntryId) -> Result<bool> {
        let mut state = self.inner.write().await;
        Ok(state
            .tables
            .get_mut(&table)
            .map(|rows| rows.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, table: TableId, after: Option<EntryId>, limit: usize) -> Result<Vec<Entry>> {
        let state = self.inner.read().await;
        let Some(rows) = state.tables.get(&table) else {
            return Ok(Vec::new());
        };
        let start = after.map(|id| id.saturating_add(1)).unwrap_or(0);
        Ok(rows.range(start..).take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn find_by_values(&self, table: TableId, field: &str, values: &[Value]) -> Result<Vec<Entry>> {
        let keys = key_set(values);
        let state = self.inner.read().await;
        Ok(state
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|e| entry_matches(e, field, &keys))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, table: TableId) -> Result<usize> {
        let state = self.inner.read().await;
        Ok(state.tables.get(&table).map(BTreeMap::len).unwrap_or(0))
    }

    async fn purge_table(&self, table: TableId) -> Result<usize> {
        let mut state = self.inner.write().await;
        Ok(state.tables.remove(&table).map(|rows| rows.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::document;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();

        let entry = store.insert(1, document([("title", "Buy groceries")])).await.unwrap();
        assert_eq!(entry.id, 1);

        let mut fetched = store.get(1, entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.get("title").and_then(Value::as_str), Some("Buy groceries"));

        fetched.data.insert("done".into(), Value::Bool(true));
        store.replace(&fetched).await.unwrap();
        let refetched = store.get(1, entry.id).await.unwrap().unwrap();
        assert_eq!(refetched.get("done").and_then(Value::as_bool), Some(true));

        assert!(store.delete(1, entry.id).await.unwrap());
        assert!(store.get(1, entry.id).await.unwrap().is_none());
        assert!(!store.delete(1, entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pages_by_id() {
        let store = MemoryStore::new();
        for i in 0..5i64 {
            store.insert(7, document([("n", i)])).await.unwrap();
        }
        store.insert(8, document([("n", 99i64)])).await.unwrap();

        let first = store.scan(7, None, 2).await.unwrap();
        assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        let rest = store.scan(7, Some(2), 10).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(store.count(7).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_find_by_values() {
        let store = MemoryStore::new();
        store.insert(1, document([("code", 10i64)])).await.unwrap();
        store.insert(1, document([("code", 20i64)])).await.unwrap();
        store.insert(1, document([("code", "10")])).await.unwrap();

        let found = store
            .find_by_values(1, "code", &[Value::Float(10.0), Value::Int(30)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }
}
