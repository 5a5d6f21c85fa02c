//! Field type detection for uploaded CSV files

use crate::schema::ColumnType;
use chrono::{NaiveDate, NaiveDateTime};

/// Date layouts tried when guessing a date column, most specific first
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%m/%d/%Y",
];

/// Parse `text` with a strptime-style `format` that may or may not
/// carry a time part
pub fn parse_with_format(text: &str, format: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let text = text.trim();
    match NaiveDateTime::parse_from_str(text, format) {
        Ok(dt) => Ok(dt),
        Err(err) => NaiveDate::parse_from_str(text, format)
            .map(|d| d.and_time(chrono::NaiveTime::MIN))
            .map_err(|_| err),
    }
}

/// Guess the type of a column from sample values
///
/// Empty cells are skipped; a column with no values at all is text.
/// Returns the date format alongside `Date`.
pub fn infer_type<'a>(samples: impl IntoIterator<Item = &'a str>) -> (ColumnType, Option<String>) {
    let values: Vec<&str> = samples
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return (ColumnType::Text, None);
    }

    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return (ColumnType::Int, None);
    }
    if values.iter().all(|v| v.parse::<f64>().map(f64::is_finite).unwrap_or(false)) {
        return (ColumnType::Float, None);
    }
    if values
        .iter()
        .all(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false"))
    {
        return (ColumnType::Bool, None);
    }
    for format in DATE_FORMATS {
        if values.iter().all(|v| parse_with_format(v, format).is_ok()) {
            return (ColumnType::Date, Some(format.to_string()));
        }
    }

    (ColumnType::Text, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_numbers() {
        assert_eq!(infer_type(["1", "", "-3"]), (ColumnType::Int, None));
        assert_eq!(infer_type(["1", "2.5"]), (ColumnType::Float, None));
        assert_eq!(infer_type(["1", "n/a"]), (ColumnType::Text, None));
    }

    #[test]
    fn test_infer_dates() {
        assert_eq!(
            infer_type(["2020-01-31", "2021-12-01"]),
            (ColumnType::Date, Some("%Y-%m-%d".to_string()))
        );
        assert_eq!(
            infer_type(["31/01/2020", "13/12/2021"]),
            (ColumnType::Date, Some("%d/%m/%Y".to_string()))
        );
    }

    #[test]
    fn test_infer_bool_and_empty() {
        assert_eq!(infer_type(["True", "false"]), (ColumnType::Bool, None));
        assert_eq!(infer_type(["", " "]), (ColumnType::Text, None));
    }

    #[test]
    fn test_parse_with_format() {
        let dt = parse_with_format("05/03/2020", "%d/%m/%Y").unwrap();
        assert_eq!(dt.to_string(), "2020-03-05 00:00:00");
        let dt = parse_with_format("05/03/2020 14:30", "%d/%m/%Y %H:%M").unwrap();
        assert_eq!(dt.to_string(), "2020-03-05 14:30:00");
        assert!(parse_with_format("2020-03-05", "%d/%m/%Y").is_err());
    }
}
