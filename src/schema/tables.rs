//! Table and database operations
//!
//! Structural changes validate the whole request before touching any
//! data. Column renames and removals then run as [`ColumnMigration`]s
//! over the table's entries, and only a fully migrated table gets its
//! new column records. Renames carry over to the saved filters and
//! charts reading the table; removing a column they still use is
//! rejected.

use super::migration::ColumnMigration;
use super::Catalog;
use super::{Column, ColumnChange, ColumnSpec, Database, DatabaseId, Table, TableId, TableUpdate};
use crate::chart::Chart;
use crate::join::FilterDefinition;
use crate::validation::{validate_column_name, validate_table_name};
use crate::{Engine, Error, Result};
use chrono::Utc;

/// Tables of one database, split by the archive flag
#[derive(Debug, Clone, Default)]
pub struct TableListing {
    pub active: Vec<Table>,
    pub archived: Vec<Table>,
}

pub(crate) async fn create_database(engine: &Engine, name: &str) -> Result<Database> {
    validate_table_name(name)?;
    let mut catalog = engine.catalog.write().await;
    let database = catalog.insert_database(name)?;
    tracing::info!(database = %database.slug, "created database");
    Ok(database)
}

/// Delete a database with its tables, returning how many entries were purged
pub(crate) async fn delete_database(engine: &Engine, id: DatabaseId) -> Result<usize> {
    let mut catalog = engine.catalog.write().await;
    let tables = catalog.remove_database(id)?;

    let mut purged = 0;
    for table in &tables {
        purged += engine.store.purge_table(*table).await?;
    }
    tracing::info!(database = id, tables = tables.len(), entries = purged, "deleted database");
    Ok(purged)
}

pub(crate) async fn create_table(
    engine: &Engine,
    database: DatabaseId,
    name: &str,
    columns: Vec<ColumnSpec>,
    user: &str,
) -> Result<Table> {
    validate_table_name(name)?;
    let name = name.trim().to_string();

    let mut catalog = engine.catalog.write().await;
    let database = catalog.database(database)?.clone();
    if catalog.tables_of(database.id).any(|t| t.name == name) {
        return Err(Error::NameConflict {
            kind: "Table",
            name,
            scope: format!("database '{}'", database.name),
        });
    }

    let mut built: Vec<Column> = Vec::with_capacity(columns.len());
    for spec in columns {
        let column = checked_column(spec, &name, &built)?;
        built.push(column);
    }

    let id = catalog.allocate_table_id()?;
    let now = Utc::now();
    let table = Table {
        id,
        slug: catalog.table_slug_for(&name, None),
        name,
        database: database.id,
        active: true,
        date_created: now,
        owner: user.to_string(),
        last_edit_date: now,
        last_edit_user: user.to_string(),
        columns: built,
    };
    catalog.save_table(table.clone())?;

    tracing::info!(table = %table.slug, columns = table.columns.len(), "created table");
    Ok(table)
}

/// Build a column from `spec`, rejecting bad or duplicate names
fn checked_column(spec: ColumnSpec, table: &str, existing: &[Column]) -> Result<Column> {
    let column = spec.into_column();
    validate_column_name(&column.name)?;
    if existing.iter().any(|c| c.name == column.name) {
        return Err(Error::NameConflict {
            kind: "Column",
            name: column.name,
            scope: format!("table '{}'", table),
        });
    }
    Ok(column)
}

/// Saved filters and charts that read one table
///
/// Column renames are applied to these copies as the update is checked,
/// and they are written back together with the table.
#[derive(Debug, Clone)]
struct Dependents {
    table: TableId,
    filters: Vec<FilterDefinition>,
    charts: Vec<Chart>,
}

impl Dependents {
    fn of(catalog: &Catalog, table: TableId) -> Self {
        Self {
            table,
            filters: catalog
                .filters()
                .filter(|f| f.tables().contains(&table))
                .cloned()
                .collect(),
            charts: catalog.charts().filter(|c| c.spec.table == table).cloned().collect(),
        }
    }

    /// Names of the filters and charts bound to `column`
    fn users_of(&self, column: &str) -> Vec<String> {
        let filters = self
            .filters
            .iter()
            .filter(|f| f.uses_column(self.table, column))
            .map(|f| format!("filter '{}'", f.name));
        let charts = self
            .charts
            .iter()
            .filter(|c| c.spec.uses_column(column))
            .map(|c| format!("chart '{}'", c.spec.name));
        filters.chain(charts).collect()
    }

    fn rename(&mut self, from: &str, to: &str) {
        for filter in &mut self.filters {
            filter.rename_column(self.table, from, to);
        }
        for chart in &mut self.charts {
            chart.spec.rename_column(from, to);
        }
    }

    /// Write back every object that differs from the catalog's copy
    fn save(&self, catalog: &mut Catalog) -> Result<()> {
        for filter in &self.filters {
            if catalog.filter(filter.id)? != filter {
                catalog.save_filter(filter.clone())?;
                tracing::debug!(filter = filter.id, "rebound filter columns");
            }
        }
        for chart in &self.charts {
            if catalog.chart(chart.id)? != chart {
                catalog.save_chart(chart.clone())?;
                tracing::debug!(chart = chart.id, "rebound chart columns");
            }
        }
        Ok(())
    }
}

/// A migration with the table and bindings as they stand once it is done
struct Step {
    migration: ColumnMigration,
    table: Table,
    dependents: Dependents,
}

pub(crate) async fn update_table(
    engine: &Engine,
    id: TableId,
    update: TableUpdate,
    user: &str,
) -> Result<Table> {
    let mut catalog = engine.catalog.write().await;
    let mut table = catalog.table(id)?.clone();
    let mut dependents = Dependents::of(&catalog, id);

    if let Some(name) = &update.name {
        validate_table_name(name)?;
        let name = name.trim().to_string();
        if name != table.name {
            if catalog.tables_of(table.database).any(|t| t.id != id && t.name == name) {
                return Err(Error::NameConflict {
                    kind: "Table",
                    name,
                    scope: format!("database '{}'", catalog.database(table.database)?.name),
                });
            }
            table.slug = catalog.table_slug_for(&name, Some(id));
            table.name = name;
        }
    }
    if let Some(active) = update.active {
        table.active = active;
    }

    let has_entries = if update.columns.is_empty() {
        false
    } else {
        engine.store.count(id).await? > 0
    };

    let mut steps = Vec::new();
    for change in update.columns {
        let migration = match change {
            ColumnChange::Add(spec) => {
                let column = checked_column(spec, &table.name, &table.columns)?;
                table.columns.push(column);
                None
            }
            ColumnChange::Edit { column, spec } => {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c.name == column)
                    .ok_or_else(|| Error::ColumnNotFound {
                        table: table.name.clone(),
                        column: column.clone(),
                    })?;

                let current = &table.columns[index];
                if current.field_type != spec.field_type && has_entries {
                    return Err(Error::FieldTypeChangeRejected {
                        table: table.name.clone(),
                        column,
                        from: current.field_type,
                        to: spec.field_type,
                    });
                }

                let new_name = match &spec.name {
                    Some(_) => spec.internal_name(),
                    None => current.name.clone(),
                };
                let mut migration = None;
                if new_name != current.name {
                    validate_column_name(&new_name)?;
                    if table.columns.iter().any(|c| c.name == new_name) {
                        return Err(Error::NameConflict {
                            kind: "Column",
                            name: new_name,
                            scope: format!("table '{}'", table.name),
                        });
                    }
                    dependents.rename(&current.name, &new_name);
                    migration = Some(ColumnMigration::rename(id, current.name.clone(), new_name.clone()));
                }

                let edited = &mut table.columns[index];
                edited.name = new_name;
                edited.display_name = spec.display_name;
                edited.field_type = spec.field_type;
                edited.help_text = spec.help_text;
                edited.required = spec.required;
                edited.unique = spec.unique;
                edited.merge_choices(spec.choices);
                migration
            }
            ColumnChange::Remove(column) => {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c.name == column)
                    .ok_or_else(|| Error::ColumnNotFound {
                        table: table.name.clone(),
                        column: column.clone(),
                    })?;
                let used_by = dependents.users_of(&column);
                if !used_by.is_empty() {
                    return Err(Error::ColumnInUse {
                        table: table.name.clone(),
                        column,
                        used_by,
                    });
                }
                table.columns.remove(index);
                Some(ColumnMigration::remove(id, column))
            }
        };

        if let Some(migration) = migration {
            steps.push(Step {
                migration,
                table: table.clone(),
                dependents: dependents.clone(),
            });
        }
    }

    // Each finished migration is saved with the schema it belongs to, so a
    // later failure never leaves entries ahead of their column records.
    for mut step in steps {
        tracing::info!(table = %table.slug, migration = ?step.migration.kind, "migrating entries");
        step.migration.run(engine.store.as_ref(), engine.config.scan_batch_size).await?;
        let migrated = step.migration.finish(&step.table.name)?;
        tracing::debug!(table = %table.slug, migrated, "migration complete");

        step.table.touch(user);
        catalog.save_table(step.table)?;
        step.dependents.save(&mut catalog)?;
    }

    table.touch(user);
    catalog.save_table(table.clone())?;
    dependents.save(&mut catalog)?;
    tracing::info!(table = %table.slug, "updated table");
    Ok(table)
}

pub(crate) async fn list_tables(engine: &Engine, database: DatabaseId) -> Result<TableListing> {
    let catalog = engine.catalog.read().await;
    catalog.database(database)?;

    let mut listing = TableListing::default();
    for table in catalog.tables_of(database) {
        if table.active {
            listing.active.push(table.clone());
        } else {
            listing.archived.push(table.clone());
        }
    }
    Ok(listing)
}

/// Hard-delete a table and its entries
pub(crate) async fn delete_table(engine: &Engine, id: TableId) -> Result<usize> {
    let mut catalog = engine.catalog.write().await;
    let table = catalog.remove_table(id)?;
    let purged = engine.store.purge_table(id).await?;
    tracing::info!(table = %table.slug, entries = purged, "deleted table");
    Ok(purged)
}
