//! Tabula - a dynamic schema engine
//!
//! Users define tables with typed columns at runtime; every row is stored
//! as one schema-less document and checked against its table's columns at
//! the engine boundary.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Tabula Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────┐ │
//! │  │  CSV        │  │  Filter     │  │  Chart      │  │  TQL    │ │
//! │  │  Import /   │  │  (Join)     │  │  Aggregate  │  │  Parser │ │
//! │  │  Export     │  │  Engine     │  │  Engine     │  │         │ │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └────┬────┘ │
//! │         ▼                ▼                ▼              ▼      │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │        Query + Validation (filters, ordering, paging)       ││
//! │  └──────────────────────────┬──────────────────────────────────┘│
//! │             ┌───────────────┴───────────────┐                   │
//! │             ▼                               ▼                   │
//! │  ┌─────────────────────┐       ┌─────────────────────────────┐  │
//! │  │  Schema Store       │       │  Document Store             │  │
//! │  │  (catalog, naming,  │       │  (EntryStore: memory or     │  │
//! │  │   migrations)       │       │   one JSON file per entry)  │  │
//! │  └─────────────────────┘       └─────────────────────────────┘  │
//! │     .tabula/catalog/{kind}/*.yaml      tables/{id}/*.json       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod chart;
pub mod config;
pub mod csv;
pub mod error;
pub mod join;
pub mod query;
pub mod schema;
pub mod storage;
pub mod validation;

pub use chart::{Aggregate, Chart, ChartData, ChartSpec, ChartType, Period};
pub use config::Config;
pub use error::{Error, Result};
pub use join::{FilterDefinition, FilterSpec, JoinSide};
pub use query::{FieldFilters, ListQuery, Page, PageRequest};
pub use schema::tables::TableListing;
pub use schema::{Column, ColumnChange, ColumnSpec, ColumnType, Database, DatabaseId, Table, TableId, TableUpdate};
pub use storage::{Document, Entry, EntryId, EntryStore, Value};

use crate::csv::{FieldMapping, ImportReport, ImportTarget, PreparedImport};
use schema::Catalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The main engine handle
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) store: Arc<dyn EntryStore>,
    /// Data root of a file-backed engine
    root: Option<PathBuf>,
}

impl Engine {
    /// An engine that keeps everything in memory
    pub fn in_memory() -> Self {
        Self::with_store(Config::default(), Arc::new(storage::MemoryStore::new()))
    }

    /// An in-memory catalog over a caller-supplied entry store
    pub fn with_store(config: Config, store: Arc<dyn EntryStore>) -> Self {
        Self {
            config,
            catalog: RwLock::new(Catalog::in_memory()),
            store,
            root: None,
        }
    }

    /// Open or create a file-backed engine at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let config = Config::load(&root)?;
        let catalog = Catalog::load(&root)?;
        let store = storage::FileStore::open(&root)?;
        tracing::info!(root = %root.display(), "opened tabula data root");

        Ok(Self {
            config,
            catalog: RwLock::new(catalog),
            store: Arc::new(store),
            root: Some(root),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    // ==========================================================================
    // Databases and tables
    // ==========================================================================

    pub async fn create_database(&self, name: &str) -> Result<Database> {
        schema::tables::create_database(self, name).await
    }

    pub async fn list_databases(&self) -> Vec<Database> {
        self.catalog.read().await.databases().cloned().collect()
    }

    pub async fn database_by_name(&self, name: &str) -> Result<Database> {
        self.catalog.read().await.database_by_name(name).cloned()
    }

    /// Delete a database with all of its tables, returning the number of
    /// entries removed
    pub async fn delete_database(&self, id: DatabaseId) -> Result<usize> {
        schema::tables::delete_database(self, id).await
    }

    /// Create a table; fails with `NameConflict` when the database already
    /// has a table of that name
    pub async fn create_table(
        &self,
        database: DatabaseId,
        name: &str,
        columns: Vec<ColumnSpec>,
        user: &str,
    ) -> Result<Table> {
        schema::tables::create_table(self, database, name, columns, user).await
    }

    /// Rename, archive, or change the columns of a table
    ///
    /// Column renames and removals rewrite every existing entry before
    /// the table definition changes.
    pub async fn update_table(&self, id: TableId, update: TableUpdate, user: &str) -> Result<Table> {
        schema::tables::update_table(self, id, update, user).await
    }

    pub async fn get_table(&self, id: TableId) -> Result<Table> {
        self.catalog.read().await.table(id).cloned()
    }

    pub async fn table_by_slug(&self, slug: &str) -> Result<Table> {
        self.catalog.read().await.table_by_slug(slug).cloned()
    }

    pub async fn list_tables(&self, database: DatabaseId) -> Result<TableListing> {
        schema::tables::list_tables(self, database).await
    }

    pub async fn delete_table(&self, id: TableId) -> Result<usize> {
        schema::tables::delete_table(self, id).await
    }

    pub async fn entries_count(&self, table: TableId) -> Result<usize> {
        self.catalog.read().await.table(table)?;
        self.store.count(table).await
    }

    // ==========================================================================
    // Entries
    // ==========================================================================

    /// Validate and store a new entry
    pub async fn create_entry(&self, table: TableId, document: Document, user: &str) -> Result<Entry> {
        query::create_entry(self, table, document, user).await
    }

    /// Validate and replace the whole document of an entry
    pub async fn update_entry(&self, table: TableId, id: EntryId, document: Document, user: &str) -> Result<Entry> {
        query::update_entry(self, table, id, document, user).await
    }

    pub async fn get_entry(&self, table: TableId, id: EntryId) -> Result<Entry> {
        query::get_entry(self, table, id).await
    }

    pub async fn delete_entry(&self, table: TableId, id: EntryId, user: &str) -> Result<()> {
        query::delete_entry(self, table, id, user).await
    }

    pub async fn list_entries(&self, table: TableId, request: &ListQuery) -> Result<Page<Entry>> {
        query::list_entries(self, table, request).await
    }

    // ==========================================================================
    // CSV
    // ==========================================================================

    /// Export matching entries as CSV bytes
    pub async fn export_csv(&self, table: TableId, filters: &FieldFilters) -> Result<Vec<u8>> {
        crate::csv::export_csv(self, table, filters).await
    }

    /// Stream matching entries as CSV into `out`, returning the row count
    pub async fn write_csv<W: std::io::Write>(&self, table: TableId, filters: &FieldFilters, out: W) -> Result<usize> {
        crate::csv::write_csv(self, table, filters, out).await
    }

    /// Keep an uploaded file and detect its fields
    pub async fn prepare_csv_import(
        &self,
        file_name: &str,
        content: Vec<u8>,
        delimiter: char,
        user: &str,
    ) -> Result<PreparedImport> {
        crate::csv::prepare_csv_import(self, file_name, content, delimiter, user).await
    }

    /// Import a prepared file with a field mapping
    pub async fn run_csv_import(
        &self,
        import_id: u64,
        target: ImportTarget,
        mapping: Vec<FieldMapping>,
        user: &str,
    ) -> Result<ImportReport> {
        crate::csv::run_csv_import(self, import_id, target, mapping, user).await
    }

    // ==========================================================================
    // Filters
    // ==========================================================================

    pub async fn create_filter(&self, spec: FilterSpec, user: &str) -> Result<FilterDefinition> {
        join::create_filter(self, spec, user).await
    }

    pub async fn update_filter(&self, id: u64, spec: FilterSpec) -> Result<FilterDefinition> {
        join::update_filter(self, id, spec).await
    }

    pub async fn get_filter(&self, id: u64) -> Result<FilterDefinition> {
        self.catalog.read().await.filter(id).cloned()
    }

    pub async fn list_filters(&self) -> Vec<FilterDefinition> {
        self.catalog.read().await.filters().cloned().collect()
    }

    pub async fn delete_filter(&self, id: u64) -> Result<()> {
        self.catalog.write().await.remove_filter(id)?;
        tracing::info!(filter = id, "deleted filter");
        Ok(())
    }

    /// One page of a filter's joined records
    ///
    /// Keys are `{table_slug}__{field}`; `fields` narrows the output to
    /// some of them.
    pub async fn resolve_filter_entries(
        &self,
        id: u64,
        fields: Option<&[String]>,
        page: PageRequest,
    ) -> Result<Page<Document>> {
        join::resolve_filter_entries(self, id, fields, page).await
    }

    pub async fn set_filter_on_dashboard(&self, id: u64, user: &str, on: bool) -> Result<()> {
        join::set_filter_on_dashboard(self, id, user, on).await
    }

    pub async fn dashboard_filters(&self, user: &str) -> Vec<FilterDefinition> {
        join::dashboard_filters(self, user).await
    }

    // ==========================================================================
    // Charts
    // ==========================================================================

    pub async fn create_chart(&self, spec: ChartSpec, user: &str) -> Result<Chart> {
        chart::create_chart(self, spec, user).await
    }

    pub async fn update_chart(&self, id: u64, spec: ChartSpec) -> Result<Chart> {
        chart::update_chart(self, id, spec).await
    }

    pub async fn get_chart(&self, id: u64) -> Result<Chart> {
        self.catalog.read().await.chart(id).cloned()
    }

    pub async fn list_charts(&self) -> Vec<Chart> {
        self.catalog.read().await.charts().cloned().collect()
    }

    pub async fn delete_chart(&self, id: u64) -> Result<()> {
        self.catalog.write().await.remove_chart(id)?;
        tracing::info!(chart = id, "deleted chart");
        Ok(())
    }

    /// Evaluate a chart into labels, datasets and rendering options
    pub async fn compute_chart_data(&self, id: u64, filters: &FieldFilters, preview: bool) -> Result<ChartData> {
        chart::compute_chart_data(self, id, filters, preview).await
    }

    pub async fn set_chart_on_dashboard(&self, id: u64, user: &str, on: bool) -> Result<()> {
        chart::set_chart_on_dashboard(self, id, user, on).await
    }

    pub async fn dashboard_charts(&self, user: &str) -> Vec<Chart> {
        chart::dashboard_charts(self, user).await
    }
}
