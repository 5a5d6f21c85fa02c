//! File-backed entry store
//!
//! One directory per table, one JSON document per entry. Entry ids are
//! allocated from a counter seeded with the highest id found on disk.

use super::collection::{entry_id_of, TableDir};
use super::document::{Document, Entry, EntryId, Value};
use super::store::{entry_matches, key_set, EntryStore};
use crate::schema::TableId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    last_id: AtomicU64,
}

impl FileStore {
    /// Open (or start) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("tables"))?;

        let last_id = WalkDir::new(root.join("tables"))
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| entry_id_of(e.path()))
            .max()
            .unwrap_or(0);

        tracing::debug!(root = %root.display(), last_id, "opened file store");
        Ok(Self {
            root,
            last_id: AtomicU64::new(last_id),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, table: TableId) -> TableDir {
        TableDir::open(table, &self.root)
    }
}

#[async_trait]
impl EntryStore for FileStore {
    async fn insert(&self, table: TableId, data: Document) -> Result<Entry> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Entry {
            id,
            table,
            date_created: Utc::now(),
            data,
        };
        self.dir(table).write(&entry).await?;
        Ok(entry)
    }

    async fn get(&self, table: TableId, id: EntryId) -> Result<Option<Entry>> {
        self.dir(table).read(id).await
    }

    async fn replace(&self, entry: &Entry) -> Result<()> {
        let dir = self.dir(entry.table);
        if dir.read(entry.id).await?.is_none() {
            return Err(Error::EntryNotFound {
                table: entry.table.to_string(),
                id: entry.id,
            });
        }
        dir.write(entry).await
    }

    async fn delete(&self, table: TableId, id: EntryId) -> Result<bool> {
        self.dir(table).delete(id).await
    }

    async fn scan(&self, table: TableId, after: Option<EntryId>, limit: usize) -> Result<Vec<Entry>> {
        let dir = self.dir(table);
        let mut entries = Vec::new();
        for id in dir.ids().into_iter().filter(|id| after.map_or(true, |a| *id > a)) {
            if entries.len() >= limit {
                break;
            }
            if let Some(entry) = dir.read(id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn find_by_values(&self, table: TableId, field: &str, values: &[Value]) -> Result<Vec<Entry>> {
        let keys = key_set(values);
        let dir = self.dir(table);
        let mut found = Vec::new();
        for id in dir.ids() {
            if let Some(entry) = dir.read(id).await? {
                if entry_matches(&entry, field, &keys) {
                    found.push(entry);
                }
            }
        }
        Ok(found)
    }

    async fn count(&self, table: TableId) -> Result<usize> {
        Ok(self.dir(table).ids().len())
    }

    async fn purge_table(&self, table: TableId) -> Result<usize> {
        self.dir(table).remove_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::document;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ids_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.insert(1, document([("a", 1i64)])).await.unwrap();
            store.insert(2, document([("a", 2i64)])).await.unwrap();
        }

        let store = FileStore::open(tmp.path()).unwrap();
        let entry = store.insert(1, document([("a", 3i64)])).await.unwrap();
        assert_eq!(entry.id, 3);
        assert_eq!(store.count(1).await.unwrap(), 2);

        let page = store.scan(1, Some(1), 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get("a"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_purge_table() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.insert(5, document([("a", 1i64)])).await.unwrap();
        store.insert(5, document([("a", 2i64)])).await.unwrap();

        assert_eq!(store.purge_table(5).await.unwrap(), 2);
        assert_eq!(store.count(5).await.unwrap(), 0);
    }
}
