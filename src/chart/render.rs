//! Turning grouped values into chart-ready series

use super::{ChartSpec, ChartType};
use crate::schema::Table;
use serde::Serialize;
use serde_json::json;

/// Series colors, assigned by index
pub const PALETTE: [&str; 20] = [
    "#223E6D", "#87C700", "#8E0101", "#FF6231", "#175B1E", "#A2D3E4", "#4B0974", "#ED1A3B", "#0081BB", "#9CCB98",
    "#DF3D84", "#FD7900", "#589674", "#C2845D", "#AA44E8", "#EFAD88", "#8590FF", "#00B3A8", "#FF8DB8", "#FBB138",
];

const TRANSPARENT: &str = "rgba(0, 0, 0, 0)";

pub fn color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Fill {
    One(String),
    PerPoint(Vec<String>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub label: String,
    pub data: Vec<Option<f64>>,
    pub background_color: Fill,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
}

/// Labels, one dataset per series, and rendering options
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub options: serde_json::Value,
}

/// A named row of values aligned with the labels
pub(crate) struct Series {
    pub label: String,
    pub data: Vec<Option<f64>>,
}

fn display_name(table: &Table, field: Option<&str>) -> Option<String> {
    field.and_then(|f| table.column(f)).map(|c| c.display_name.clone())
}

pub(crate) fn y_axis_label(chart: &ChartSpec, table: &Table) -> String {
    match display_name(table, chart.y_axis_field.as_deref()) {
        Some(name) => format!("{} ({})", chart.y_axis_function, name),
        None => chart.y_axis_function.to_string(),
    }
}

pub(crate) fn x_axis_label(chart: &ChartSpec, table: &Table) -> String {
    let x = display_name(table, chart.x_axis_field.as_deref());
    let timeline = display_name(table, chart.timeline_field.as_deref());
    match (x, timeline) {
        (Some(x), Some(timeline)) => format!("{} ({})", x, timeline),
        (Some(x), None) => x,
        (None, Some(timeline)) => {
            let period = chart.timeline_period.map(|p| p.as_str()).unwrap_or_default();
            let mut chars = period.chars();
            let period: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            };
            format!("{} ({})", timeline, period)
        }
        (None, None) => table.name.clone(),
    }
}

fn options(chart: &ChartSpec, table: &Table) -> serde_json::Value {
    let scales = if chart.chart_type.is_radial() {
        json!({})
    } else {
        json!({
            "yAxes": [{ "scaleLabel": { "display": true, "labelString": y_axis_label(chart, table) } }],
            "xAxes": [{ "scaleLabel": { "display": true, "labelString": x_axis_label(chart, table) } }],
        })
    };
    json!({
        "maintainAspectRatio": false,
        "tooltips": { "mode": "index", "position": "nearest" },
        "scales": scales,
    })
}

fn dataset(chart_type: ChartType, series: Series, index: usize) -> Dataset {
    let (background_color, border_color) = match chart_type {
        ChartType::Line => (Fill::One(TRANSPARENT.to_string()), Some(color(index).to_string())),
        _ => (Fill::One(color(index).to_string()), None),
    };
    Dataset {
        label: series.label,
        data: series.data,
        background_color,
        border_color,
    }
}

/// Assemble the output structure
///
/// A lone unnamed series on a Pie or Doughnut chart gets one color per
/// point instead of one per series.
pub(crate) fn render(chart: &ChartSpec, table: &Table, labels: Vec<String>, series: Vec<Series>, single: bool) -> ChartData {
    let datasets = if single {
        series
            .into_iter()
            .map(|s| {
                let label = display_name(table, chart.x_axis_field.as_deref()).unwrap_or_else(|| y_axis_label(chart, table));
                if chart.chart_type.is_radial() {
                    let colors = (0..s.data.len()).map(|i| color(i).to_string()).collect();
                    Dataset {
                        label,
                        data: s.data,
                        background_color: Fill::PerPoint(colors),
                        border_color: None,
                    }
                } else {
                    dataset(chart.chart_type, Series { label, data: s.data }, 0)
                }
            })
            .collect()
    } else {
        series
            .into_iter()
            .enumerate()
            .map(|(i, s)| dataset(chart.chart_type, s, i))
            .collect()
    };

    ChartData {
        labels,
        datasets,
        options: options(chart, table),
    }
}
