//! Saved filters: two-table equality joins
//!
//! A filter stores configuration only. Its rows are computed on demand by
//! [`resolve`](crate::Engine::resolve_filter_entries): every secondary
//! entry whose join value also appears on the primary side is merged
//! with a primary entry into one flat record, keys prefixed with the
//! source table's slug.

mod resolve;

pub(crate) use resolve::resolve_filter_entries;

use crate::schema::catalog::{CatalogObject, DashboardKind};
use crate::schema::{Catalog, TableId};
use crate::{Engine, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One table taking part in a join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSide {
    pub table: TableId,
    /// Selected columns, by internal name
    pub fields: Vec<String>,
    /// Column compared by equality with the other side
    pub join_field: String,
}

impl JoinSide {
    pub fn new<I, S>(table: TableId, fields: I, join_field: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            fields: fields.into_iter().map(Into::into).collect(),
            join_field: join_field.into(),
        }
    }
}

/// Requested filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSpec {
    pub name: String,
    pub primary: JoinSide,
    /// Only the first secondary side takes part in resolution
    pub secondary: Vec<JoinSide>,
}

/// A stored filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterDefinition {
    pub id: u64,
    pub name: String,
    pub owner: String,
    pub primary: JoinSide,
    pub secondary: Vec<JoinSide>,
    pub date_created: DateTime<Utc>,
    pub last_edit_date: DateTime<Utc>,
}

impl FilterDefinition {
    /// Every table the filter reads
    pub fn tables(&self) -> Vec<TableId> {
        std::iter::once(self.primary.table)
            .chain(self.secondary.iter().map(|s| s.table))
            .collect()
    }

    fn sides_mut(&mut self) -> impl Iterator<Item = &mut JoinSide> {
        std::iter::once(&mut self.primary).chain(self.secondary.iter_mut())
    }

    /// Whether any side reading `table` selects or joins on `column`
    pub fn uses_column(&self, table: TableId, column: &str) -> bool {
        std::iter::once(&self.primary)
            .chain(&self.secondary)
            .filter(|side| side.table == table)
            .any(|side| side.join_field == column || side.fields.iter().any(|f| f == column))
    }

    /// Follow a column rename on `table`, returning whether anything changed
    pub fn rename_column(&mut self, table: TableId, from: &str, to: &str) -> bool {
        let mut changed = false;
        for side in self.sides_mut().filter(|side| side.table == table) {
            for field in side.fields.iter_mut().filter(|f| f.as_str() == from) {
                *field = to.to_string();
                changed = true;
            }
            if side.join_field == from {
                side.join_field = to.to_string();
                changed = true;
            }
        }
        changed
    }

    /// The secondary side used for resolution
    pub fn joined(&self) -> Result<&JoinSide> {
        self.secondary.first().ok_or_else(|| Error::JoinConfiguration {
            message: format!("filter '{}' has no secondary table", self.name),
        })
    }
}

impl CatalogObject for FilterDefinition {
    const KIND: &'static str = "filters";

    fn id(&self) -> u64 {
        self.id
    }
}

/// Check a join side against its table
fn check_side(catalog: &Catalog, side: &JoinSide, role: &str) -> Result<()> {
    let table = catalog.table(side.table)?;

    if side.fields.is_empty() {
        return Err(Error::JoinConfiguration {
            message: format!("the {} table '{}' has no selected fields", role, table.name),
        });
    }
    let unknown: Vec<String> = side
        .fields
        .iter()
        .filter(|f| !table.has_column(f))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(Error::UnknownFieldReference {
            table: table.name.clone(),
            fields: unknown,
        });
    }
    if !table.has_column(&side.join_field) {
        return Err(Error::JoinConfiguration {
            message: format!(
                "join field '{}' is not a column of the {} table '{}'",
                side.join_field, role, table.name
            ),
        });
    }
    if !side.fields.contains(&side.join_field) {
        return Err(Error::JoinConfiguration {
            message: format!(
                "join field '{}' must be among the selected fields of the {} table '{}'",
                side.join_field, role, table.name
            ),
        });
    }
    Ok(())
}

/// Validate a whole filter configuration before it is stored or run
pub(crate) fn check_configuration(catalog: &Catalog, primary: &JoinSide, secondary: &[JoinSide]) -> Result<()> {
    check_side(catalog, primary, "primary")?;
    if secondary.is_empty() {
        return Err(Error::JoinConfiguration {
            message: "a filter needs a secondary table".to_string(),
        });
    }
    for side in secondary {
        check_side(catalog, side, "secondary")?;
    }
    Ok(())
}

pub(crate) async fn create_filter(engine: &Engine, spec: FilterSpec, user: &str) -> Result<FilterDefinition> {
    let mut catalog = engine.catalog.write().await;
    check_configuration(&catalog, &spec.primary, &spec.secondary)?;

    let now = Utc::now();
    let filter = FilterDefinition {
        id: catalog.allocate_filter_id()?,
        name: spec.name,
        owner: user.to_string(),
        primary: spec.primary,
        secondary: spec.secondary,
        date_created: now,
        last_edit_date: now,
    };
    catalog.save_filter(filter.clone())?;
    tracing::info!(filter = filter.id, name = %filter.name, "created filter");
    Ok(filter)
}

pub(crate) async fn update_filter(engine: &Engine, id: u64, spec: FilterSpec) -> Result<FilterDefinition> {
    let mut catalog = engine.catalog.write().await;
    let mut filter = catalog.filter(id)?.clone();
    check_configuration(&catalog, &spec.primary, &spec.secondary)?;

    filter.name = spec.name;
    filter.primary = spec.primary;
    filter.secondary = spec.secondary;
    filter.last_edit_date = Utc::now();
    catalog.save_filter(filter.clone())?;
    tracing::info!(filter = id, "updated filter");
    Ok(filter)
}

pub(crate) async fn set_filter_on_dashboard(engine: &Engine, id: u64, user: &str, on: bool) -> Result<()> {
    let mut catalog = engine.catalog.write().await;
    catalog.filter(id)?;
    catalog.set_favourite(DashboardKind::Filters, user, id, on)
}

pub(crate) async fn dashboard_filters(engine: &Engine, user: &str) -> Vec<FilterDefinition> {
    let catalog = engine.catalog.read().await;
    catalog
        .favourites(DashboardKind::Filters, user)
        .into_iter()
        .filter_map(|id| catalog.filter(id).ok().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ColumnType};

    async fn setup() -> (Engine, TableId, TableId) {
        let engine = Engine::in_memory();
        let db = engine.create_database("Shop").await.unwrap();
        let clients = engine
            .create_table(
                db.id,
                "Clients",
                vec![
                    ColumnSpec::new("Code", ColumnType::Text),
                    ColumnSpec::new("Name", ColumnType::Text),
                ],
                "ana",
            )
            .await
            .unwrap();
        let orders = engine
            .create_table(
                db.id,
                "Orders",
                vec![
                    ColumnSpec::new("Client", ColumnType::Text),
                    ColumnSpec::new("Total", ColumnType::Float),
                ],
                "ana",
            )
            .await
            .unwrap();
        (engine, clients.id, orders.id)
    }

    #[tokio::test]
    async fn test_configuration_checks() {
        let (engine, clients, orders) = setup().await;

        let missing_secondary = FilterSpec {
            name: "f".into(),
            primary: JoinSide::new(clients, ["code"], "code"),
            secondary: vec![],
        };
        assert!(matches!(
            engine.create_filter(missing_secondary, "ana").await,
            Err(Error::JoinConfiguration { .. })
        ));

        let join_not_selected = FilterSpec {
            name: "f".into(),
            primary: JoinSide::new(clients, ["name"], "code"),
            secondary: vec![JoinSide::new(orders, ["client"], "client")],
        };
        assert!(matches!(
            engine.create_filter(join_not_selected, "ana").await,
            Err(Error::JoinConfiguration { .. })
        ));

        let unknown_field = FilterSpec {
            name: "f".into(),
            primary: JoinSide::new(clients, ["code", "age"], "code"),
            secondary: vec![JoinSide::new(orders, ["client"], "client")],
        };
        assert!(matches!(
            engine.create_filter(unknown_field, "ana").await,
            Err(Error::UnknownFieldReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_dashboard_favourites() {
        let (engine, clients, orders) = setup().await;
        let filter = engine
            .create_filter(
                FilterSpec {
                    name: "Orders by client".into(),
                    primary: JoinSide::new(clients, ["code", "name"], "code"),
                    secondary: vec![JoinSide::new(orders, ["client", "total"], "client")],
                },
                "ana",
            )
            .await
            .unwrap();

        engine.set_filter_on_dashboard(filter.id, "ana", true).await.unwrap();
        assert_eq!(engine.dashboard_filters("ana").await, vec![filter.clone()]);
        assert!(engine.dashboard_filters("bob").await.is_empty());

        engine.delete_filter(filter.id).await.unwrap();
        assert!(engine.dashboard_filters("ana").await.is_empty());
    }
}
