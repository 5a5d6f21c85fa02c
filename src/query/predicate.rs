//! Predicate evaluation
//!
//! Evaluates parsed `tql` expressions against entries. Field references
//! resolve to document keys, plus the entry attributes `id` and
//! `date_created`.

use crate::schema::Table;
use crate::storage::document::{Entry, Value};
use crate::{Error, Result};
use std::cmp::Ordering;
use tql::{CompareOp, Expr, Literal};

/// Attributes every entry carries besides its document
const ENTRY_ATTRIBUTES: &[&str] = &["id", "date_created"];

/// A parsed predicate checked against one table's columns
#[derive(Debug, Clone)]
pub struct Predicate {
    expr: Expr,
}

impl Predicate {
    /// Parse `text` and check that every field it names exists in `table`
    pub fn compile(text: &str, table: &Table) -> Result<Self> {
        let expr = tql::parse(text)?;

        let unknown: Vec<String> = expr
            .fields()
            .into_iter()
            .filter(|f| !table.has_column(f) && !ENTRY_ATTRIBUTES.contains(&f.as_str()))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::UnknownFieldReference {
                table: table.name.clone(),
                fields: unknown,
            });
        }

        Ok(Self { expr })
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        evaluate(&self.expr, entry)
    }
}

/// Evaluate an expression against an entry
pub fn evaluate(expr: &Expr, entry: &Entry) -> bool {
    evaluate_expr(expr, entry).is_truthy()
}

/// Result of expression evaluation
#[derive(Debug, Clone)]
enum ExprResult {
    Value(Value),
    Bool(bool),
    Null,
}

impl ExprResult {
    fn is_truthy(&self) -> bool {
        match self {
            ExprResult::Bool(b) => *b,
            ExprResult::Value(Value::Bool(b)) => *b,
            ExprResult::Value(Value::Null) => false,
            ExprResult::Null => false,
            _ => true,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, ExprResult::Null | ExprResult::Value(Value::Null))
    }

    fn value(&self) -> Option<Value> {
        match self {
            ExprResult::Value(Value::Null) | ExprResult::Null => None,
            ExprResult::Value(v) => Some(v.clone()),
            ExprResult::Bool(b) => Some(Value::Bool(*b)),
        }
    }
}

fn evaluate_expr(expr: &Expr, entry: &Entry) -> ExprResult {
    match expr {
        Expr::Literal(lit) => ExprResult::Value(literal_to_value(lit)),

        Expr::Field(name) => match name.as_str() {
            "id" => ExprResult::Value(Value::Int(entry.id as i64)),
            "date_created" => ExprResult::Value(Value::Date(entry.date_created.naive_utc())),
            field => entry
                .get(field)
                .cloned()
                .map(ExprResult::Value)
                .unwrap_or(ExprResult::Null),
        },

        Expr::Compare { left, op, right } => {
            let left_val = evaluate_expr(left, entry);
            let right_val = evaluate_expr(right, entry);
            ExprResult::Bool(compare_op(&left_val, *op, &right_val))
        }

        Expr::And(left, right) => ExprResult::Bool(
            evaluate_expr(left, entry).is_truthy() && evaluate_expr(right, entry).is_truthy(),
        ),

        Expr::Or(left, right) => ExprResult::Bool(
            evaluate_expr(left, entry).is_truthy() || evaluate_expr(right, entry).is_truthy(),
        ),

        Expr::Not(inner) => ExprResult::Bool(!evaluate_expr(inner, entry).is_truthy()),

        Expr::Like { expr, pattern, case_insensitive, negated } => {
            let matches = match evaluate_expr(expr, entry).value() {
                Some(v) => v.matches_pattern(pattern, *case_insensitive),
                None => false,
            };
            ExprResult::Bool(if *negated { !matches } else { matches })
        }

        Expr::In { expr, values, negated } => {
            let val = evaluate_expr(expr, entry);
            if val.is_null() {
                return ExprResult::Bool(false);
            }
            let in_list = values
                .iter()
                .any(|lit| values_equal(&val, &ExprResult::Value(literal_to_value(lit))));
            ExprResult::Bool(if *negated { !in_list } else { in_list })
        }

        Expr::IsNull { expr, negated } => {
            let is_null = evaluate_expr(expr, entry).is_null();
            ExprResult::Bool(if *negated { !is_null } else { is_null })
        }

        Expr::Between { expr, low, high, negated } => {
            let val = evaluate_expr(expr, entry);
            let low_val = evaluate_expr(low, entry);
            let high_val = evaluate_expr(high, entry);

            let in_range = matches!(
                compare_values(&val, &low_val),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare_values(&val, &high_val),
                Some(Ordering::Less | Ordering::Equal)
            );
            ExprResult::Bool(if *negated { !in_range } else { in_range })
        }
    }
}

fn compare_op(left: &ExprResult, op: CompareOp, right: &ExprResult) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !left.is_null() && !right.is_null() && !values_equal(left, right),
        CompareOp::Lt => compare_values(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(compare_values(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => compare_values(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(compare_values(left, right), Some(Ordering::Greater | Ordering::Equal)),
    }
}

fn values_equal(a: &ExprResult, b: &ExprResult) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Order two evaluated values; `None` when they are not comparable
fn compare_values(a: &ExprResult, b: &ExprResult) -> Option<Ordering> {
    let (a, b) = (a.value()?, b.value()?);
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.to_number()?.partial_cmp(&b.to_number()?)
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(_), _) | (_, Value::Date(_)) => Some(a.as_datetime()?.cmp(&b.as_datetime()?)),
        // numeric text stored in text columns still compares with numbers
        (Value::Int(_) | Value::Float(_), Value::String(_))
        | (Value::String(_), Value::Int(_) | Value::Float(_)) => {
            a.to_number()?.partial_cmp(&b.to_number()?)
        }
        _ => Some(a.to_text().cmp(&b.to_text())),
    }
}

/// Convert a literal to a document value
pub fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ColumnType};
    use crate::storage::document::{document, parse_datetime};
    use chrono::Utc;

    fn table() -> Table {
        Table {
            id: 1,
            name: "Orders".into(),
            slug: "orders".into(),
            database: 1,
            active: true,
            date_created: Utc::now(),
            owner: "ana".into(),
            last_edit_date: Utc::now(),
            last_edit_user: "ana".into(),
            columns: vec![
                ColumnSpec::new("Status", ColumnType::Text).into_column(),
                ColumnSpec::new("Total", ColumnType::Float).into_column(),
                ColumnSpec::new("Placed", ColumnType::Date).into_column(),
                ColumnSpec::new("Note", ColumnType::Text).into_column(),
            ],
        }
    }

    fn entry(id: u64, status: &str, total: f64) -> Entry {
        Entry {
            id,
            table: 1,
            date_created: Utc::now(),
            data: document([
                ("status", Value::from(status)),
                ("total", Value::from(total)),
                ("placed", Value::from(parse_datetime("2021-06-15").unwrap())),
            ]),
        }
    }

    fn check(text: &str, entry: &Entry) -> bool {
        Predicate::compile(text, &table()).unwrap().matches(entry)
    }

    #[test]
    fn test_comparisons() {
        let e = entry(1, "paid", 12.5);
        assert!(check("status = 'paid' AND total > 10", &e));
        assert!(check("total >= 12.5 AND total <= 13", &e));
        assert!(!check("status != 'paid'", &e));
        assert!(check("total = 12.5 OR status = 'void'", &e));
        assert!(check("NOT status = 'void'", &e));
    }

    #[test]
    fn test_int_float_equality() {
        let e = entry(1, "paid", 10.0);
        assert!(check("total = 10", &e));
        assert!(check("total IN (5, 10)", &e));
    }

    #[test]
    fn test_dates_compare_with_text_literals() {
        let e = entry(1, "paid", 1.0);
        assert!(check("placed > '2021-01-01'", &e));
        assert!(check("placed BETWEEN '2021-06-01' AND '2021-06-30'", &e));
        assert!(!check("placed < '2021-06-15'", &e));
    }

    #[test]
    fn test_nulls_and_patterns() {
        let e = entry(7, "Paid in full", 1.0);
        assert!(check("note IS NULL", &e));
        assert!(!check("note = 'x'", &e));
        assert!(!check("note != 'x'", &e));
        assert!(check("status ILIKE 'paid%'", &e));
        assert!(!check("status LIKE 'paid%'", &e));
        assert!(check("id = 7", &e));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = Predicate::compile("colour = 'red' OR size > 2", &table()).unwrap_err();
        match err {
            Error::UnknownFieldReference { fields, .. } => {
                assert_eq!(fields, vec!["colour".to_string(), "size".to_string()])
            }
            other => panic!("Expected UnknownFieldReference, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(matches!(
            Predicate::compile("status = ", &table()),
            Err(Error::ParseError { .. })
        ));
    }
}
