//! Column migrations
//!
//! Renaming or removing a column rewrites the document of every entry in
//! the table. A migration is a resumable job: it walks the table in
//! bounded pages ordered by entry id, remembers the last id it handled,
//! and records a per-entry failure instead of aborting the batch.

use crate::storage::{Document, EntryId, EntryStore};
use crate::schema::TableId;
use crate::{Error, Result};

/// What a migration does to each document
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationKind {
    /// Move the value stored under `from` to `to`
    Rename { from: String, to: String },
    /// Drop the key entirely
    Remove { column: String },
}

impl MigrationKind {
    /// Rewrite `data`, returning whether anything changed
    fn apply(&self, data: &mut Document) -> bool {
        match self {
            MigrationKind::Rename { from, to } => match data.remove(from) {
                Some(value) => {
                    data.insert(to.clone(), value);
                    true
                }
                None => false,
            },
            MigrationKind::Remove { column } => data.remove(column).is_some(),
        }
    }

    fn column(&self) -> &str {
        match self {
            MigrationKind::Rename { from, .. } => from,
            MigrationKind::Remove { column } => column,
        }
    }
}

/// A column rewrite over every entry of one table
#[derive(Debug, Clone)]
pub struct ColumnMigration {
    pub table: TableId,
    pub kind: MigrationKind,
    /// Last entry id handled
    cursor: Option<EntryId>,
    done: bool,
    /// Entries visited without error
    pub migrated: usize,
    /// Entries whose rewrite failed, with the reason
    pub failed: Vec<(EntryId, String)>,
}

impl ColumnMigration {
    pub fn new(table: TableId, kind: MigrationKind) -> Self {
        Self {
            table,
            kind,
            cursor: None,
            done: false,
            migrated: 0,
            failed: Vec::new(),
        }
    }

    pub fn rename(table: TableId, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(table, MigrationKind::Rename { from: from.into(), to: to.into() })
    }

    pub fn remove(table: TableId, column: impl Into<String>) -> Self {
        Self::new(table, MigrationKind::Remove { column: column.into() })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one page of at most `batch` entries
    ///
    /// Returns `true` while entries remain. A failing scan leaves the
    /// cursor untouched so the job can be stepped again.
    pub async fn step(&mut self, store: &dyn EntryStore, batch: usize) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        let page = store.scan(self.table, self.cursor, batch.max(1)).await?;
        if page.is_empty() {
            self.done = true;
            return Ok(false);
        }

        for mut entry in page {
            self.cursor = Some(entry.id);
            if !self.kind.apply(&mut entry.data) {
                self.migrated += 1;
                continue;
            }
            match store.replace(&entry).await {
                Ok(()) => self.migrated += 1,
                Err(err) => {
                    tracing::warn!(table = self.table, entry = entry.id, error = %err, "column migration failed for entry");
                    self.failed.push((entry.id, err.to_string()));
                }
            }
        }
        Ok(true)
    }

    /// Step until every entry has been visited
    pub async fn run(&mut self, store: &dyn EntryStore, batch: usize) -> Result<()> {
        while self.step(store, batch).await? {}
        Ok(())
    }

    /// Number of migrated entries, or `MigrationIncomplete` naming the
    /// entries that could not be rewritten
    pub fn finish(self, table_name: &str) -> Result<usize> {
        if self.failed.is_empty() {
            return Ok(self.migrated);
        }
        Err(Error::MigrationIncomplete {
            table: table_name.to_string(),
            column: self.kind.column().to_string(),
            migrated: self.migrated,
            failed: self.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::{document, Entry, Value};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    /// Store whose `replace` fails for one entry id
    struct FailingReplace {
        inner: MemoryStore,
        poisoned: EntryId,
    }

    #[async_trait]
    impl EntryStore for FailingReplace {
        async fn insert(&self, table: TableId, data: Document) -> Result<Entry> {
            self.inner.insert(table, data).await
        }
        async fn get(&self, table: TableId, id: EntryId) -> Result<Option<Entry>> {
            self.inner.get(table, id).await
        }
        async fn replace(&self, entry: &Entry) -> Result<()> {
            if entry.id == self.poisoned {
                return Err(Error::Other("disk full".into()));
            }
            self.inner.replace(entry).await
        }
        async fn delete(&self, table: TableId, id: EntryId) -> Result<bool> {
            self.inner.delete(table, id).await
        }
        async fn scan(&self, table: TableId, after: Option<EntryId>, limit: usize) -> Result<Vec<Entry>> {
            self.inner.scan(table, after, limit).await
        }
        async fn find_by_values(&self, table: TableId, field: &str, values: &[Value]) -> Result<Vec<Entry>> {
            self.inner.find_by_values(table, field, values).await
        }
        async fn count(&self, table: TableId) -> Result<usize> {
            self.inner.count(table).await
        }
        async fn purge_table(&self, table: TableId) -> Result<usize> {
            self.inner.purge_table(table).await
        }
    }

    #[tokio::test]
    async fn test_rename_moves_every_value() {
        let store = MemoryStore::new();
        for i in 0..7i64 {
            store.insert(1, document([("a", i)])).await.unwrap();
        }
        store.insert(1, document([("other", 1i64)])).await.unwrap();

        let mut job = ColumnMigration::rename(1, "a", "b");
        job.run(&store, 3).await.unwrap();
        assert!(job.is_done());
        assert_eq!(job.finish("t").unwrap(), 8);

        let entries = store.scan(1, None, 100).await.unwrap();
        for (i, entry) in entries.iter().take(7).enumerate() {
            assert_eq!(entry.get("b"), Some(&Value::Int(i as i64)));
            assert!(entry.get("a").is_none());
        }
        assert!(entries[7].get("b").is_none());
    }

    #[tokio::test]
    async fn test_remove_strips_key() {
        let store = MemoryStore::new();
        store.insert(1, document([("a", 1i64), ("b", 2i64)])).await.unwrap();
        store.insert(2, document([("a", 1i64)])).await.unwrap();

        let mut job = ColumnMigration::remove(1, "a");
        job.run(&store, 10).await.unwrap();

        let entries = store.scan(1, None, 10).await.unwrap();
        assert!(entries[0].get("a").is_none());
        assert_eq!(entries[0].get("b"), Some(&Value::Int(2)));
        // other tables are untouched
        assert!(store.scan(2, None, 10).await.unwrap()[0].get("a").is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_and_resumable() {
        let inner = MemoryStore::new();
        for i in 0..4i64 {
            inner.insert(1, document([("a", i)])).await.unwrap();
        }
        let store = FailingReplace { inner, poisoned: 2 };

        let mut job = ColumnMigration::rename(1, "a", "b");
        job.run(&store, 2).await.unwrap();
        match job.finish("t") {
            Err(Error::MigrationIncomplete { migrated, failed, .. }) => {
                assert_eq!(migrated, 3);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, 2);
            }
            other => panic!("Expected MigrationIncomplete, got {:?}", other),
        }

        // a second pass only has the failed entry left to move
        let store = FailingReplace { inner: store.inner, poisoned: 0 };
        let mut job = ColumnMigration::rename(1, "a", "b");
        job.run(&store, 2).await.unwrap();
        assert_eq!(job.finish("t").unwrap(), 4);
        let entries = store.scan(1, None, 10).await.unwrap();
        assert!(entries.iter().all(|e| e.get("a").is_none() && e.get("b").is_some()));
    }
}
