//! Calendar periods used to bucket timeline values

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Start of the period containing `at`; weeks start on ISO Monday
    pub fn truncate(&self, at: NaiveDateTime) -> NaiveDateTime {
        let date = at.date();
        match self {
            Period::Minute => at.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(at),
            Period::Hour => date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(at.hour())),
            Period::Day => date.and_time(NaiveTime::MIN),
            Period::Week => {
                let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.and_time(NaiveTime::MIN)
            }
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .unwrap_or(date)
                .and_time(NaiveTime::MIN),
            Period::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                .unwrap_or(date)
                .and_time(NaiveTime::MIN),
        }
    }

    /// Start of the following period; `start` must already be truncated
    pub fn next(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Period::Minute => start.checked_add_signed(Duration::minutes(1)),
            Period::Hour => start.checked_add_signed(Duration::hours(1)),
            Period::Day => start.checked_add_signed(Duration::days(1)),
            Period::Week => start.checked_add_signed(Duration::days(7)),
            Period::Month => start.checked_add_months(Months::new(1)),
            Period::Year => start.checked_add_months(Months::new(12)),
        }
    }

    /// Axis label of a bucket
    pub fn label(&self, start: NaiveDateTime) -> String {
        let format = match self {
            Period::Minute => "%Y-%m-%d %H:%M",
            Period::Hour => "%Y-%m-%d %H",
            Period::Day => "%Y-%m-%d",
            Period::Week => "%G-%V",
            Period::Month => "%Y-%m",
            Period::Year => "%Y",
        };
        start.format(format).to_string()
    }

    /// Every bucket from `first` to `last` inclusive, or `None` when there
    /// would be more than `limit` of them
    pub fn range(&self, first: NaiveDateTime, last: NaiveDateTime, limit: usize) -> Option<Vec<NaiveDateTime>> {
        let mut buckets = Vec::new();
        let mut current = Some(self.truncate(first));
        while let Some(bucket) = current.filter(|b| *b <= last) {
            if buckets.len() == limit {
                return None;
            }
            buckets.push(bucket);
            current = self.next(bucket);
        }
        Some(buckets)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Ok(Period::Minute),
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(format!("unknown period '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_truncate() {
        let t = at("2024-03-14 15:42:31");
        assert_eq!(Period::Minute.truncate(t), at("2024-03-14 15:42:00"));
        assert_eq!(Period::Hour.truncate(t), at("2024-03-14 15:00:00"));
        assert_eq!(Period::Day.truncate(t), at("2024-03-14 00:00:00"));
        assert_eq!(Period::Week.truncate(t), at("2024-03-11 00:00:00"));
        assert_eq!(Period::Month.truncate(t), at("2024-03-01 00:00:00"));
        assert_eq!(Period::Year.truncate(t), at("2024-01-01 00:00:00"));
    }

    #[test]
    fn test_iso_week_label_crosses_year() {
        // 2021-01-01 is a Friday in ISO week 53 of 2020
        let bucket = Period::Week.truncate(at("2021-01-01 10:00:00"));
        assert_eq!(bucket, at("2020-12-28 00:00:00"));
        assert_eq!(Period::Week.label(bucket), "2020-53");
    }

    #[test]
    fn test_month_range() {
        let buckets = Period::Month
            .range(at("2024-01-05 00:00:00"), at("2024-04-01 00:00:00"), 100)
            .unwrap();
        let labels: Vec<String> = buckets.iter().map(|b| Period::Month.label(*b)).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03", "2024-04"]);
    }

    #[test]
    fn test_range_respects_limit() {
        let (first, last) = (at("2020-01-01 00:00:00"), at("2024-01-01 00:00:00"));
        assert!(Period::Minute.range(first, last, 10_000).is_none());
        assert_eq!(Period::Year.range(first, last, 5).map(|b| b.len()), Some(5));
        assert!(Period::Year.range(first, last, 4).is_none());
    }

    #[test]
    fn test_month_end_stepping() {
        let jan = Period::Month.truncate(at("2024-01-31 12:00:00"));
        assert_eq!(Period::Month.next(jan), Some(at("2024-02-01 00:00:00")));
    }
}
