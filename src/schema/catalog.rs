//! The catalog: every user-defined object that is not entry data
//!
//! Databases, tables (with their columns), saved filters, charts, CSV
//! import descriptors and dashboard favourites are held in memory and,
//! for file-backed engines, mirrored as one YAML file per object:
//!
//! ```text
//! /.tabula/
//!   catalog/
//!     sequence.yaml
//!     dashboards.yaml
//!     databases/1.yaml
//!     tables/1.yaml
//!     filters/1.yaml
//!     charts/1.yaml
//!     imports/1.yaml
//!   imports/1.csv
//! ```

use super::naming::{slugify, unique_slug};
use super::{Database, DatabaseId, Table, TableId};
use crate::chart::Chart;
use crate::csv::CsvImport;
use crate::join::FilterDefinition;
use crate::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Objects the catalog stores one file per
pub trait CatalogObject: Serialize + DeserializeOwned {
    /// Directory name under `catalog/`
    const KIND: &'static str;

    fn id(&self) -> u64;
}

impl CatalogObject for Database {
    const KIND: &'static str = "databases";

    fn id(&self) -> u64 {
        self.id
    }
}

impl CatalogObject for Table {
    const KIND: &'static str = "tables";

    fn id(&self) -> u64 {
        self.id
    }
}

/// Last id handed out per object kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequence {
    #[serde(default)]
    databases: u64,
    #[serde(default)]
    tables: u64,
    #[serde(default)]
    filters: u64,
    #[serde(default)]
    charts: u64,
    #[serde(default)]
    imports: u64,
}

/// Which dashboard a favourite belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardKind {
    Filters,
    Charts,
}

/// Per-user favourites
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dashboards {
    #[serde(default)]
    pub filters: BTreeMap<String, BTreeSet<u64>>,
    #[serde(default)]
    pub charts: BTreeMap<String, BTreeSet<u64>>,
}

impl Dashboards {
    fn of_kind(&mut self, kind: DashboardKind) -> &mut BTreeMap<String, BTreeSet<u64>> {
        match kind {
            DashboardKind::Filters => &mut self.filters,
            DashboardKind::Charts => &mut self.charts,
        }
    }

    fn forget(&mut self, kind: DashboardKind, id: u64) {
        for ids in self.of_kind(kind).values_mut() {
            ids.remove(&id);
        }
    }
}

/// Registry of all schema-level objects
#[derive(Debug, Default)]
pub struct Catalog {
    /// `<root>/.tabula`, or `None` for a purely in-memory catalog
    path: Option<PathBuf>,
    sequence: Sequence,
    databases: BTreeMap<DatabaseId, Database>,
    tables: BTreeMap<TableId, Table>,
    filters: BTreeMap<u64, FilterDefinition>,
    charts: BTreeMap<u64, Chart>,
    imports: BTreeMap<u64, CsvImport>,
    /// Uploaded CSV bytes when there is no directory to keep them in
    uploads: BTreeMap<u64, Vec<u8>>,
    dashboards: Dashboards,
}

impl Catalog {
    /// A catalog that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the catalog stored under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(".tabula");
        let catalog_dir = path.join("catalog");
        std::fs::create_dir_all(&catalog_dir)?;

        let sequence = read_yaml::<Sequence>(&catalog_dir.join("sequence.yaml"))?.unwrap_or_default();
        let dashboards =
            read_yaml::<Dashboards>(&catalog_dir.join("dashboards.yaml"))?.unwrap_or_default();

        let catalog = Self {
            databases: load_kind(&catalog_dir)?,
            tables: load_kind(&catalog_dir)?,
            filters: load_kind(&catalog_dir)?,
            charts: load_kind(&catalog_dir)?,
            imports: load_kind(&catalog_dir)?,
            uploads: BTreeMap::new(),
            path: Some(path),
            sequence,
            dashboards,
        };

        tracing::debug!(
            databases = catalog.databases.len(),
            tables = catalog.tables.len(),
            filters = catalog.filters.len(),
            charts = catalog.charts.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    // =========================================================================
    // Persistence helpers
    // =========================================================================

    fn catalog_dir(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join("catalog"))
    }

    fn persist<T: CatalogObject>(&self, object: &T) -> Result<()> {
        if let Some(dir) = self.catalog_dir() {
            write_yaml(&dir.join(T::KIND).join(format!("{}.yaml", object.id())), object)?;
        }
        Ok(())
    }

    fn unpersist<T: CatalogObject>(&self, id: u64) -> Result<()> {
        if let Some(dir) = self.catalog_dir() {
            let path = dir.join(T::KIND).join(format!("{}.yaml", id));
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn persist_sequence(&self) -> Result<()> {
        if let Some(dir) = self.catalog_dir() {
            write_yaml(&dir.join("sequence.yaml"), &self.sequence)?;
        }
        Ok(())
    }

    fn persist_dashboards(&self) -> Result<()> {
        if let Some(dir) = self.catalog_dir() {
            write_yaml(&dir.join("dashboards.yaml"), &self.dashboards)?;
        }
        Ok(())
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// Create a database; names are unique across the catalog
    pub fn insert_database(&mut self, name: &str) -> Result<Database> {
        let name = name.trim().to_string();
        if self.databases.values().any(|d| d.name == name) {
            return Err(Error::NameConflict {
                kind: "Database",
                name,
                scope: "this catalog".to_string(),
            });
        }

        self.sequence.databases += 1;
        self.persist_sequence()?;

        let slug = unique_slug(&slugify(&name), |s| self.databases.values().any(|d| d.slug == s));
        let database = Database {
            id: self.sequence.databases,
            name,
            slug,
            date_created: Utc::now(),
        };
        self.persist(&database)?;
        self.databases.insert(database.id, database.clone());
        Ok(database)
    }

    pub fn database(&self, id: DatabaseId) -> Result<&Database> {
        self.databases.get(&id).ok_or_else(|| Error::DatabaseNotFound {
            name: id.to_string(),
        })
    }

    /// Find a database by slug or exact name
    pub fn database_by_name(&self, name: &str) -> Result<&Database> {
        self.databases
            .values()
            .find(|d| d.slug == name || d.name == name)
            .ok_or_else(|| Error::DatabaseNotFound {
                name: name.to_string(),
            })
    }

    pub fn databases(&self) -> impl Iterator<Item = &Database> {
        self.databases.values()
    }

    /// Remove a database and every table it owns, returning the removed
    /// table ids so their entries can be purged
    pub fn remove_database(&mut self, id: DatabaseId) -> Result<Vec<TableId>> {
        let database = self.databases.remove(&id).ok_or_else(|| Error::DatabaseNotFound {
            name: id.to_string(),
        })?;
        self.unpersist::<Database>(id)?;

        let owned: Vec<TableId> = self
            .tables
            .values()
            .filter(|t| t.database == database.id)
            .map(|t| t.id)
            .collect();
        for table in &owned {
            self.remove_table(*table)?;
        }
        Ok(owned)
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Reserve an id for a new table
    pub fn allocate_table_id(&mut self) -> Result<TableId> {
        self.sequence.tables += 1;
        self.persist_sequence()?;
        Ok(self.sequence.tables)
    }

    /// Slug for a table named `name`, unique across the catalog
    ///
    /// `own` is the table being renamed, whose current slug stays available.
    pub fn table_slug_for(&self, name: &str, own: Option<TableId>) -> String {
        unique_slug(&slugify(name), |s| {
            self.tables.values().any(|t| Some(t.id) != own && t.slug == s)
        })
    }

    pub fn table(&self, id: TableId) -> Result<&Table> {
        self.tables.get(&id).ok_or_else(|| Error::TableNotFound {
            table: id.to_string(),
        })
    }

    pub fn table_mut(&mut self, id: TableId) -> Result<&mut Table> {
        self.tables.get_mut(&id).ok_or_else(|| Error::TableNotFound {
            table: id.to_string(),
        })
    }

    /// Find a table by slug
    pub fn table_by_slug(&self, slug: &str) -> Result<&Table> {
        self.tables
            .values()
            .find(|t| t.slug == slug)
            .ok_or_else(|| Error::TableNotFound {
                table: slug.to_string(),
            })
    }

    /// Tables of a database, in id order
    pub fn tables_of(&self, database: DatabaseId) -> impl Iterator<Item = &Table> {
        self.tables.values().filter(move |t| t.database == database)
    }

    /// Insert or replace a table definition
    pub fn save_table(&mut self, table: Table) -> Result<()> {
        self.persist(&table)?;
        self.tables.insert(table.id, table);
        Ok(())
    }

    /// Persist the current in-memory state of a table
    pub fn flush_table(&self, id: TableId) -> Result<()> {
        self.persist(self.table(id)?)
    }

    /// Remove a table along with the filters and charts built on it
    pub fn remove_table(&mut self, id: TableId) -> Result<Table> {
        let table = self.tables.remove(&id).ok_or_else(|| Error::TableNotFound {
            table: id.to_string(),
        })?;
        self.unpersist::<Table>(id)?;

        let charts: Vec<u64> = self.charts.values().filter(|c| c.spec.table == id).map(|c| c.id).collect();
        for chart in charts {
            self.remove_chart(chart)?;
        }
        let filters: Vec<u64> = self
            .filters
            .values()
            .filter(|f| f.tables().contains(&id))
            .map(|f| f.id)
            .collect();
        for filter in filters {
            self.remove_filter(filter)?;
        }
        Ok(table)
    }

    /// Union `values` into the choices of an enum column
    ///
    /// The read-modify-write happens under the caller's exclusive borrow of
    /// the catalog, so concurrent writers cannot lose each other's values.
    pub fn merge_choices<I, S>(&mut self, table: TableId, column: &str, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table_ref = self.table_mut(table)?;
        let table_name = table_ref.name.clone();
        let column_ref = table_ref.column_mut(column).ok_or_else(|| Error::ColumnNotFound {
            table: table_name,
            column: column.to_string(),
        })?;

        let added = column_ref.merge_choices(values);
        if added > 0 {
            tracing::debug!(table, column, added, "extended enum choices");
            self.flush_table(table)?;
        }
        Ok(added)
    }

    // =========================================================================
    // Filters and charts
    // =========================================================================

    pub fn allocate_filter_id(&mut self) -> Result<u64> {
        self.sequence.filters += 1;
        self.persist_sequence()?;
        Ok(self.sequence.filters)
    }

    pub fn filter(&self, id: u64) -> Result<&FilterDefinition> {
        self.filters.get(&id).ok_or(Error::FilterNotFound { id })
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterDefinition> {
        self.filters.values()
    }

    pub fn save_filter(&mut self, filter: FilterDefinition) -> Result<()> {
        self.persist(&filter)?;
        self.filters.insert(filter.id, filter);
        Ok(())
    }

    pub fn remove_filter(&mut self, id: u64) -> Result<FilterDefinition> {
        let filter = self.filters.remove(&id).ok_or(Error::FilterNotFound { id })?;
        self.unpersist::<FilterDefinition>(id)?;
        self.dashboards.forget(DashboardKind::Filters, id);
        self.persist_dashboards()?;
        Ok(filter)
    }

    pub fn allocate_chart_id(&mut self) -> Result<u64> {
        self.sequence.charts += 1;
        self.persist_sequence()?;
        Ok(self.sequence.charts)
    }

    pub fn chart(&self, id: u64) -> Result<&Chart> {
        self.charts.get(&id).ok_or(Error::ChartNotFound { id })
    }

    pub fn charts(&self) -> impl Iterator<Item = &Chart> {
        self.charts.values()
    }

    pub fn save_chart(&mut self, chart: Chart) -> Result<()> {
        self.persist(&chart)?;
        self.charts.insert(chart.id, chart);
        Ok(())
    }

    pub fn remove_chart(&mut self, id: u64) -> Result<Chart> {
        let chart = self.charts.remove(&id).ok_or(Error::ChartNotFound { id })?;
        self.unpersist::<Chart>(id)?;
        self.dashboards.forget(DashboardKind::Charts, id);
        self.persist_dashboards()?;
        Ok(chart)
    }

    // =========================================================================
    // Dashboards
    // =========================================================================

    /// Add or remove a favourite for `user`
    pub fn set_favourite(&mut self, kind: DashboardKind, user: &str, id: u64, on: bool) -> Result<()> {
        let ids = self.dashboards.of_kind(kind).entry(user.to_string()).or_default();
        if on {
            ids.insert(id);
        } else {
            ids.remove(&id);
        }
        self.persist_dashboards()
    }

    /// Favourite ids of `user`, ascending
    pub fn favourites(&self, kind: DashboardKind, user: &str) -> Vec<u64> {
        let map = match kind {
            DashboardKind::Filters => &self.dashboards.filters,
            DashboardKind::Charts => &self.dashboards.charts,
        };
        map.get(user).map(|ids| ids.iter().copied().collect()).unwrap_or_default()
    }

    // =========================================================================
    // CSV imports
    // =========================================================================

    pub fn allocate_import_id(&mut self) -> Result<u64> {
        self.sequence.imports += 1;
        self.persist_sequence()?;
        Ok(self.sequence.imports)
    }

    pub fn csv_import(&self, id: u64) -> Result<&CsvImport> {
        self.imports.get(&id).ok_or(Error::ImportNotFound { id })
    }

    pub fn save_import(&mut self, import: CsvImport) -> Result<()> {
        self.persist(&import)?;
        self.imports.insert(import.id, import);
        Ok(())
    }

    /// Keep the raw bytes of an uploaded CSV file
    pub fn store_upload(&mut self, id: u64, content: Vec<u8>) -> Result<()> {
        match &self.path {
            Some(path) => {
                let dir = path.join("imports");
                std::fs::create_dir_all(&dir)?;
                let file = dir.join(format!("{}.csv", id));
                std::fs::write(&file, content)
                    .map_err(|source| Error::FileWriteError { path: file, source })?;
            }
            None => {
                self.uploads.insert(id, content);
            }
        }
        Ok(())
    }

    /// The raw bytes of an uploaded CSV file
    pub fn upload(&self, id: u64) -> Result<Vec<u8>> {
        match &self.path {
            Some(path) => {
                let file = path.join("imports").join(format!("{}.csv", id));
                if !file.exists() {
                    return Err(Error::ImportNotFound { id });
                }
                std::fs::read(&file).map_err(|source| Error::FileReadError { path: file, source })
            }
            None => self.uploads.get(&id).cloned().ok_or(Error::ImportNotFound { id }),
        }
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| Error::FileReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(serde_yaml::from_str(&content)?))
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_yaml::to_string(value)?;
    std::fs::write(path, content).map_err(|source| Error::FileWriteError {
        path: path.to_path_buf(),
        source,
    })
}

fn load_kind<T: CatalogObject>(catalog_dir: &Path) -> Result<BTreeMap<u64, T>> {
    let dir = catalog_dir.join(T::KIND);
    let mut objects = BTreeMap::new();
    if !dir.exists() {
        return Ok(objects);
    }

    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "yaml").unwrap_or(false) {
            if let Some(object) = read_yaml::<T>(&path)? {
                objects.insert(object.id(), object);
            }
        }
    }
    Ok(objects)
}
