//! Charts: saved aggregations over one table
//!
//! A chart never stores results. Each evaluation walks the table's
//! entries (optionally narrowed by field filters and the chart's own
//! `tql` predicate), groups them either by timeline bucket or by
//! category, aggregates every group and renders the outcome as
//! `{labels, datasets, options}`.

mod aggregate;
mod period;
mod render;

pub use aggregate::{Accumulator, Aggregate};
pub use period::Period;
pub use render::{ChartData, Dataset, Fill, PALETTE};

use crate::query::{scan_matching, FieldFilters, Predicate};
use crate::schema::catalog::{CatalogObject, DashboardKind};
use crate::schema::{ColumnType, Table, TableId};
use crate::storage::document::{Entry, Value};
use crate::{Engine, Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use render::Series;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChartType {
    #[default]
    Line,
    Bar,
    Pie,
    Doughnut,
}

impl ChartType {
    /// Pie and Doughnut charts have no cartesian axes
    pub fn is_radial(&self) -> bool {
        matches!(self, ChartType::Pie | ChartType::Doughnut)
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartType::Line => "Line",
            ChartType::Bar => "Bar",
            ChartType::Pie => "Pie",
            ChartType::Doughnut => "Doughnut",
        };
        f.write_str(name)
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(ChartType::Line),
            "bar" => Ok(ChartType::Bar),
            "pie" => Ok(ChartType::Pie),
            "doughnut" => Ok(ChartType::Doughnut),
            other => Err(format!("unknown chart type '{}'", other)),
        }
    }
}

/// What a chart computes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    pub name: String,
    pub table: TableId,
    pub chart_type: ChartType,
    /// `tql` predicate applied before grouping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_period: Option<Period>,
    #[serde(default)]
    pub timeline_include_nulls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis_field: Option<String>,
    /// Splits each category into one series per value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis_field: Option<String>,
    #[serde(default)]
    pub y_axis_function: Aggregate,
}

impl ChartSpec {
    pub fn new(name: impl Into<String>, table: TableId, chart_type: ChartType) -> Self {
        Self {
            name: name.into(),
            table,
            chart_type,
            ..Default::default()
        }
    }

    pub fn timeline(mut self, field: impl Into<String>, period: Period) -> Self {
        self.timeline_field = Some(field.into());
        self.timeline_period = Some(period);
        self
    }

    pub fn include_nulls(mut self) -> Self {
        self.timeline_include_nulls = true;
        self
    }

    pub fn x_axis(mut self, field: impl Into<String>) -> Self {
        self.x_axis_field = Some(field.into());
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by_field = Some(field.into());
        self
    }

    pub fn y_axis(mut self, field: impl Into<String>, function: Aggregate) -> Self {
        self.y_axis_field = Some(field.into());
        self.y_axis_function = function;
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        [
            &self.timeline_field,
            &self.x_axis_field,
            &self.group_by_field,
            &self.y_axis_field,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
    }

    /// Check the bindings against `table`
    pub fn check(&self, table: &Table) -> Result<()> {
        let unknown: Vec<String> = self
            .referenced_fields()
            .filter(|f| !table.has_column(f))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::UnknownFieldReference {
                table: table.name.clone(),
                fields: unknown,
            });
        }

        let fail = |message: String| Err(Error::ChartConfiguration { message });
        match (&self.timeline_field, self.timeline_period) {
            (Some(field), None) => {
                return fail(format!("timeline field '{}' is set but no timeline period is", field));
            }
            (None, Some(period)) => {
                return fail(format!("timeline period '{}' is set without a timeline field", period));
            }
            (Some(field), Some(_)) => {
                if table.column(field).map(|c| c.field_type) != Some(ColumnType::Date) {
                    return fail(format!("timeline field '{}' is not a date column", field));
                }
                if self.group_by_field.is_some() {
                    return fail("a secondary grouping cannot be combined with a timeline".to_string());
                }
            }
            (None, None) => {}
        }
        if self.group_by_field.is_some() && self.x_axis_field.is_none() {
            return fail("a secondary grouping needs a category (x axis) field".to_string());
        }
        if self.y_axis_function.needs_values() && self.y_axis_field.is_none() {
            return fail(format!("{} needs a value (y axis) field", self.y_axis_function));
        }
        if let Some(text) = self.predicate_text() {
            Predicate::compile(text, table)?;
        }
        Ok(())
    }

    /// Whether a binding or the predicate refers to `column`
    pub fn uses_column(&self, column: &str) -> bool {
        self.referenced_fields().any(|f| f == column)
            || self
                .predicate_text()
                .and_then(|text| tql::parse(text).ok())
                .map(|expr| expr.fields().iter().any(|f| f == column))
                .unwrap_or(false)
    }

    /// Follow a column rename, returning whether anything changed
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        let mut changed = false;
        for field in [
            &mut self.timeline_field,
            &mut self.x_axis_field,
            &mut self.group_by_field,
            &mut self.y_axis_field,
        ] {
            if field.as_deref() == Some(from) {
                *field = Some(to.to_string());
                changed = true;
            }
        }
        let predicate = self.predicate_text().and_then(|text| tql::parse(text).ok());
        if let Some(mut expr) = predicate {
            if expr.rename_field(from, to) {
                self.filter = Some(expr.to_string());
                changed = true;
            }
        }
        changed
    }

    fn predicate_text(&self) -> Option<&str> {
        self.filter.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    fn y_value(&self, entry: &Entry) -> Option<f64> {
        self.y_axis_field
            .as_deref()
            .and_then(|f| entry.get(f))
            .and_then(Value::to_number)
    }
}

/// A stored chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chart {
    pub id: u64,
    pub owner: String,
    #[serde(flatten)]
    pub spec: ChartSpec,
    pub date_created: DateTime<Utc>,
    pub last_edit_date: DateTime<Utc>,
}

impl CatalogObject for Chart {
    const KIND: &'static str = "charts";

    fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) async fn create_chart(engine: &Engine, spec: ChartSpec, user: &str) -> Result<Chart> {
    let mut catalog = engine.catalog.write().await;
    spec.check(catalog.table(spec.table)?)?;

    let now = Utc::now();
    let chart = Chart {
        id: catalog.allocate_chart_id()?,
        owner: user.to_string(),
        spec,
        date_created: now,
        last_edit_date: now,
    };
    catalog.save_chart(chart.clone())?;
    tracing::info!(chart = chart.id, name = %chart.spec.name, "created chart");
    Ok(chart)
}

pub(crate) async fn update_chart(engine: &Engine, id: u64, spec: ChartSpec) -> Result<Chart> {
    let mut catalog = engine.catalog.write().await;
    let mut chart = catalog.chart(id)?.clone();
    spec.check(catalog.table(spec.table)?)?;

    chart.spec = spec;
    chart.last_edit_date = Utc::now();
    catalog.save_chart(chart.clone())?;
    tracing::info!(chart = id, "updated chart");
    Ok(chart)
}

pub(crate) async fn set_chart_on_dashboard(engine: &Engine, id: u64, user: &str, on: bool) -> Result<()> {
    let mut catalog = engine.catalog.write().await;
    catalog.chart(id)?;
    catalog.set_favourite(DashboardKind::Charts, user, id, on)
}

pub(crate) async fn dashboard_charts(engine: &Engine, user: &str) -> Vec<Chart> {
    let catalog = engine.catalog.read().await;
    catalog
        .favourites(DashboardKind::Charts, user)
        .into_iter()
        .filter_map(|id| catalog.chart(id).ok().cloned())
        .collect()
}

/// Evaluate a chart over the current entries of its table
///
/// With `preview`, only the first `preview_limit` matching entries are
/// aggregated.
pub(crate) async fn compute_chart_data(
    engine: &Engine,
    id: u64,
    filters: &FieldFilters,
    preview: bool,
) -> Result<ChartData> {
    let (chart, table) = {
        let catalog = engine.catalog.read().await;
        let chart = catalog.chart(id)?.clone();
        let table = catalog.table(chart.spec.table)?.clone();
        (chart, table)
    };
    let spec = &chart.spec;
    spec.check(&table)?;

    let predicate = spec.predicate_text().map(|q| Predicate::compile(q, &table)).transpose()?;
    let compiled = filters.compile(&table);
    let limit = preview.then_some(engine.config.preview_limit);
    let entries = scan_matching(engine, table.id, &compiled, predicate.as_ref(), limit).await?;

    let data = match (&spec.timeline_field, spec.timeline_period) {
        (Some(field), Some(period)) => {
            by_timeline(spec, &table, field, period, &entries, engine.config.max_chart_buckets)?
        }
        _ => by_category(spec, &table, &entries),
    };
    tracing::debug!(
        chart = id,
        entries = entries.len(),
        labels = data.labels.len(),
        series = data.datasets.len(),
        "computed chart"
    );
    Ok(data)
}

fn by_timeline(
    spec: &ChartSpec,
    table: &Table,
    field: &str,
    period: Period,
    entries: &[Entry],
    max_buckets: usize,
) -> Result<ChartData> {
    let mut buckets: BTreeMap<NaiveDateTime, HashMap<String, Accumulator>> = BTreeMap::new();
    let mut names: IndexSet<String> = IndexSet::new();
    let mut skipped = 0usize;

    for entry in entries {
        let Some(at) = entry.get(field).and_then(Value::as_datetime) else {
            skipped += 1;
            continue;
        };
        let name = category(spec.x_axis_field.as_deref(), entry);
        names.insert(name.clone());
        buckets
            .entry(period.truncate(at))
            .or_default()
            .entry(name)
            .or_default()
            .push(spec.y_value(entry));
    }
    if skipped > 0 {
        tracing::warn!(table = %table.slug, field, skipped, "entries without a usable timeline value");
    }

    let keys: Vec<NaiveDateTime> = match (buckets.keys().next(), buckets.keys().next_back()) {
        (Some(first), Some(last)) if spec.timeline_include_nulls => {
            period.range(*first, *last, max_buckets).ok_or_else(|| Error::ChartConfiguration {
                message: format!(
                    "the timeline spans more than {} {} buckets; pick a longer period",
                    max_buckets, period
                ),
            })?
        }
        _ => buckets.keys().copied().collect(),
    };

    let series = names
        .iter()
        .map(|name| Series {
            label: name.clone(),
            data: keys
                .iter()
                .map(|k| {
                    buckets
                        .get(k)
                        .and_then(|groups| groups.get(name))
                        .map_or(Some(0.0), |acc| acc.finish(spec.y_axis_function))
                })
                .collect(),
        })
        .collect();
    let labels = keys.iter().map(|k| period.label(*k)).collect();

    Ok(render::render(spec, table, labels, series, spec.x_axis_field.is_none()))
}

fn by_category(spec: &ChartSpec, table: &Table, entries: &[Entry]) -> ChartData {
    let mut groups: IndexMap<String, HashMap<String, Accumulator>> = IndexMap::new();
    let mut names: IndexSet<String> = IndexSet::new();

    if spec.x_axis_field.is_none() {
        groups.insert(table.name.clone(), HashMap::new());
        names.insert(String::new());
    }

    for entry in entries {
        let label = match spec.x_axis_field.as_deref() {
            Some(x) => category(Some(x), entry),
            None => table.name.clone(),
        };
        let name = category(spec.group_by_field.as_deref(), entry);
        names.insert(name.clone());
        groups
            .entry(label)
            .or_default()
            .entry(name)
            .or_default()
            .push(spec.y_value(entry));
    }

    let series = names
        .iter()
        .map(|name| Series {
            label: name.clone(),
            data: groups
                .values()
                .map(|g| {
                    g.get(name)
                        .map_or(Some(0.0), |acc| acc.finish(spec.y_axis_function))
                })
                .collect(),
        })
        .collect();
    let labels = groups.keys().cloned().collect();

    render::render(spec, table, labels, series, spec.group_by_field.is_none())
}

/// Text of `field` in `entry`, or an empty label
fn category(field: Option<&str>, entry: &Entry) -> String {
    field
        .and_then(|f| entry.get(f))
        .map(Value::to_text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;
    use crate::Config;
    use crate::storage::document::document;

    async fn sales(engine: &Engine) -> TableId {
        let db = engine.create_database("Shop").await.unwrap();
        let table = engine
            .create_table(
                db.id,
                "Sales",
                vec![
                    ColumnSpec::new("Sold at", ColumnType::Date),
                    ColumnSpec::new("Region", ColumnType::Text),
                    ColumnSpec::new("Channel", ColumnType::Text),
                    ColumnSpec::new("Amount", ColumnType::Float),
                ],
                "ana",
            )
            .await
            .unwrap();
        let rows = [
            ("2024-01-10T09:00:00", "north", "web", 10.0),
            ("2024-01-20T09:00:00", "south", "shop", 5.0),
            ("2024-04-02T09:00:00", "north", "shop", 7.0),
        ];
        for (at, region, channel, amount) in rows {
            engine
                .create_entry(
                    table.id,
                    document([
                        ("sold_at", Value::from(at)),
                        ("region", Value::from(region)),
                        ("channel", Value::from(channel)),
                        ("amount", Value::Float(amount)),
                    ]),
                    "ana",
                )
                .await
                .unwrap();
        }
        table.id
    }

    #[tokio::test]
    async fn test_timeline_densification() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;
        let chart = engine
            .create_chart(
                ChartSpec::new("Monthly", table, ChartType::Bar)
                    .timeline("sold_at", Period::Month)
                    .include_nulls(),
                "ana",
            )
            .await
            .unwrap();

        let data = engine.compute_chart_data(chart.id, &FieldFilters::new(), false).await.unwrap();
        assert_eq!(data.labels, vec!["2024-01", "2024-02", "2024-03", "2024-04"]);
        assert_eq!(data.datasets.len(), 1);
        assert_eq!(data.datasets[0].data, vec![Some(2.0), Some(0.0), Some(0.0), Some(1.0)]);
        assert_eq!(data.options["scales"]["xAxes"][0]["scaleLabel"]["labelString"], "Sold at (Month)");
    }

    #[tokio::test]
    async fn test_densification_is_bounded() {
        let config = Config {
            max_chart_buckets: 3,
            ..Config::default()
        };
        let engine = Engine::with_store(config, std::sync::Arc::new(crate::storage::MemoryStore::new()));
        let table = sales(&engine).await;
        let dense = engine
            .create_chart(
                ChartSpec::new("Monthly", table, ChartType::Bar)
                    .timeline("sold_at", Period::Month)
                    .include_nulls(),
                "ana",
            )
            .await
            .unwrap();
        let err = engine
            .compute_chart_data(dense.id, &FieldFilters::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChartConfiguration { .. }));

        // sparse timelines only hold the buckets that have entries
        let sparse = engine
            .create_chart(ChartSpec::new("Sparse", table, ChartType::Bar).timeline("sold_at", Period::Month), "ana")
            .await
            .unwrap();
        let data = engine.compute_chart_data(sparse.id, &FieldFilters::new(), false).await.unwrap();
        assert_eq!(data.labels, vec!["2024-01", "2024-04"]);
    }

    #[test]
    fn test_rename_column_rewrites_bindings_and_predicate() {
        let mut spec = ChartSpec::new("By region", 1, ChartType::Bar)
            .x_axis("region")
            .y_axis("amount", Aggregate::Sum)
            .filter("region != 'west' AND amount > 0");
        assert!(spec.uses_column("region"));
        assert!(spec.rename_column("region", "area"));
        assert_eq!(spec.x_axis_field.as_deref(), Some("area"));
        assert_eq!(spec.filter.as_deref(), Some("(area != 'west' AND amount > 0)"));
        assert!(!spec.uses_column("region"));
        assert!(!spec.rename_column("region", "zone"));
    }

    #[tokio::test]
    async fn test_timeline_series_per_category() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;
        let chart = engine
            .create_chart(
                ChartSpec::new("By region", table, ChartType::Line)
                    .timeline("sold_at", Period::Month)
                    .x_axis("region")
                    .y_axis("amount", Aggregate::Sum),
                "ana",
            )
            .await
            .unwrap();

        let data = engine.compute_chart_data(chart.id, &FieldFilters::new(), false).await.unwrap();
        assert_eq!(data.labels, vec!["2024-01", "2024-04"]);
        let labels: Vec<&str> = data.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["north", "south"]);
        assert_eq!(data.datasets[0].data, vec![Some(10.0), Some(7.0)]);
        assert_eq!(data.datasets[1].data, vec![Some(5.0), Some(0.0)]);
        assert_eq!(data.datasets[0].background_color, Fill::One("rgba(0, 0, 0, 0)".into()));
        assert_eq!(data.datasets[1].border_color.as_deref(), Some(PALETTE[1]));
    }

    #[tokio::test]
    async fn test_category_with_secondary_grouping() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;
        let chart = engine
            .create_chart(
                ChartSpec::new("Mix", table, ChartType::Bar).x_axis("region").group_by("channel"),
                "ana",
            )
            .await
            .unwrap();

        let data = engine.compute_chart_data(chart.id, &FieldFilters::new(), false).await.unwrap();
        // first-encountered order, not alphabetical
        assert_eq!(data.labels, vec!["north", "south"]);
        let labels: Vec<&str> = data.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["web", "shop"]);
        assert_eq!(data.datasets[0].data, vec![Some(1.0), Some(0.0)]);
        assert_eq!(data.datasets[1].data, vec![Some(1.0), Some(1.0)]);
    }

    #[tokio::test]
    async fn test_pie_has_point_colors_and_no_scales() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;
        let chart = engine
            .create_chart(
                ChartSpec::new("Share", table, ChartType::Pie)
                    .x_axis("region")
                    .y_axis("amount", Aggregate::Avg),
                "ana",
            )
            .await
            .unwrap();

        let filters = FieldFilters::new().with("channel", "shop,web");
        let data = engine.compute_chart_data(chart.id, &filters, false).await.unwrap();
        assert_eq!(data.datasets[0].data, vec![Some(8.5), Some(5.0)]);
        assert_eq!(data.datasets[0].label, "Region");
        assert_eq!(
            data.datasets[0].background_color,
            Fill::PerPoint(vec![PALETTE[0].to_string(), PALETTE[1].to_string()])
        );
        assert_eq!(data.options["scales"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_ungrouped_count_and_predicate() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;
        let chart = engine
            .create_chart(ChartSpec::new("All", table, ChartType::Bar).filter("amount > 6"), "ana")
            .await
            .unwrap();

        let data = engine.compute_chart_data(chart.id, &FieldFilters::new(), false).await.unwrap();
        assert_eq!(data.labels, vec!["Sales"]);
        assert_eq!(data.datasets[0].data, vec![Some(2.0)]);
    }

    #[tokio::test]
    async fn test_configuration_errors() {
        let engine = Engine::in_memory();
        let table = sales(&engine).await;

        let mut missing_period = ChartSpec::new("c", table, ChartType::Line);
        missing_period.timeline_field = Some("sold_at".into());
        let with_grouping = ChartSpec::new("c", table, ChartType::Bar)
            .timeline("sold_at", Period::Day)
            .x_axis("region")
            .group_by("channel");
        let not_a_date = ChartSpec::new("c", table, ChartType::Line).timeline("region", Period::Day);
        let sum_without_values = ChartSpec {
            y_axis_function: Aggregate::Sum,
            ..ChartSpec::new("c", table, ChartType::Bar)
        };

        for spec in [missing_period, with_grouping, not_a_date, sum_without_values] {
            assert!(matches!(
                engine.create_chart(spec, "ana").await,
                Err(Error::ChartConfiguration { .. })
            ));
        }

        let unknown = ChartSpec::new("c", table, ChartType::Bar).x_axis("city");
        assert!(matches!(
            engine.create_chart(unknown, "ana").await,
            Err(Error::UnknownFieldReference { .. })
        ));
    }
}
