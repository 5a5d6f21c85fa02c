//! Table directory - the entries of one table stored as JSON files
//!
//! Directory structure:
//! ```text
//! /tables/
//!   /1/
//!     1.json
//!     4.json
//!   /2/
//!     2.json
//!     3.json
//! ```
//!
//! Files are written to a temporary name and renamed into place, so a
//! reader never observes a half-written entry.

use super::document::{Entry, EntryId};
use crate::schema::TableId;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// The on-disk directory holding one table's entries
#[derive(Debug)]
pub struct TableDir {
    /// Owning table
    pub table: TableId,
    /// Path to the table directory
    pub path: PathBuf,
}

impl TableDir {
    /// Open the directory of `table` under the store root
    pub fn open(table: TableId, base_path: &Path) -> Self {
        let path = base_path.join("tables").join(table.to_string());
        Self { table, path }
    }

    /// Create the table directory if it doesn't exist
    pub async fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Check if the table directory exists
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Ids of every stored entry, ascending
    pub fn ids(&self) -> Vec<EntryId> {
        if !self.path.exists() {
            return Vec::new();
        }

        let mut ids: Vec<EntryId> = WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| entry_id_of(e.path()))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Read a single entry by id
    pub async fn read(&self, id: EntryId) -> Result<Option<Entry>> {
        let path = self.entry_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(&path)
            .await
            .map_err(|source| Error::FileReadError { path: path.clone(), source })?;
        let entry: Entry = serde_json::from_slice(&content)?;
        Ok(Some(entry))
    }

    /// Write an entry, replacing any previous version
    pub async fn write(&self, entry: &Entry) -> Result<()> {
        self.ensure_exists().await?;
        let path = self.entry_path(entry.id);
        let tmp = self.path.join(format!(".{}.json.tmp", entry.id));

        let content = serde_json::to_vec_pretty(entry)?;
        fs::write(&tmp, content)
            .await
            .map_err(|source| Error::FileWriteError { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| Error::FileWriteError { path, source })?;
        Ok(())
    }

    /// Delete an entry by id
    pub async fn delete(&self, id: EntryId) -> Result<bool> {
        let path = self.entry_path(id);
        if path.exists() {
            fs::remove_file(&path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove the whole directory, returning how many entries it held
    pub async fn remove_all(&self) -> Result<usize> {
        if !self.exists() {
            return Ok(0);
        }
        let count = self.ids().len();
        fs::remove_dir_all(&self.path).await?;
        Ok(count)
    }

    fn entry_path(&self, id: EntryId) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }
}

/// Entry id encoded in a `<id>.json` file name
pub(crate) fn entry_id_of(path: &Path) -> Option<EntryId> {
    if path.extension().map(|e| e == "json").unwrap_or(false) {
        path.file_stem()?.to_str()?.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::document;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_table_dir_crud() {
        let tmp = TempDir::new().unwrap();
        let dir = TableDir::open(3, tmp.path());

        let entry = Entry {
            id: 12,
            table: 3,
            date_created: Utc::now(),
            data: document([("title", "Buy groceries")]),
        };
        dir.write(&entry).await.unwrap();
        assert!(tmp.path().join("tables/3/12.json").exists());

        let fetched = dir.read(12).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert_eq!(dir.ids(), vec![12]);

        assert!(dir.delete(12).await.unwrap());
        assert!(dir.read(12).await.unwrap().is_none());
    }

    #[test]
    fn test_entry_id_of_ignores_temp_files() {
        assert_eq!(entry_id_of(Path::new("/x/42.json")), Some(42));
        assert_eq!(entry_id_of(Path::new("/x/.42.json.tmp")), None);
        assert_eq!(entry_id_of(Path::new("/x/notes.json")), None);
    }
}
