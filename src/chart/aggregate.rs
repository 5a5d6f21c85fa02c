//! Aggregation functions over a group of entries

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregate {
    #[default]
    Count,
    Sum,
    Min,
    Max,
    Avg,
    StdDev,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "Count",
            Aggregate::Sum => "Sum",
            Aggregate::Min => "Min",
            Aggregate::Max => "Max",
            Aggregate::Avg => "Avg",
            Aggregate::StdDev => "StdDev",
        }
    }

    /// Whether the function reads a value column
    pub fn needs_values(&self) -> bool {
        !matches!(self, Aggregate::Count)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running state of one group
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    members: usize,
    values: Vec<f64>,
}

impl Accumulator {
    /// Record one entry, with its numeric value when it has one
    pub fn push(&mut self, value: Option<f64>) {
        self.members += 1;
        if let Some(v) = value {
            self.values.push(v);
        }
    }

    /// Final value; `None` when a value function saw no numbers
    pub fn finish(&self, function: Aggregate) -> Option<f64> {
        let values = &self.values;
        if function.needs_values() && values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let value = match function {
            Aggregate::Count => self.members as f64,
            Aggregate::Sum => sum,
            Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Avg => sum / n,
            Aggregate::StdDev => {
                let mean = sum / n;
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
            }
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(values: &[Option<f64>]) -> Accumulator {
        let mut acc = Accumulator::default();
        for v in values {
            acc.push(*v);
        }
        acc
    }

    #[test]
    fn test_functions() {
        let acc = group(&[Some(2.0), Some(4.0), None, Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)]);
        assert_eq!(acc.finish(Aggregate::Count), Some(9.0));
        assert_eq!(acc.finish(Aggregate::Sum), Some(40.0));
        assert_eq!(acc.finish(Aggregate::Min), Some(2.0));
        assert_eq!(acc.finish(Aggregate::Max), Some(9.0));
        assert_eq!(acc.finish(Aggregate::Avg), Some(5.0));
        // population standard deviation
        assert_eq!(acc.finish(Aggregate::StdDev), Some(2.0));
    }

    #[test]
    fn test_no_values() {
        let acc = group(&[None, None]);
        assert_eq!(acc.finish(Aggregate::Count), Some(2.0));
        assert_eq!(acc.finish(Aggregate::Avg), None);
    }
}
