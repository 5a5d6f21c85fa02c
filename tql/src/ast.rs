//! Abstract Syntax Tree for TQL

use serde::{Deserialize, Serialize};
use std::fmt;

/// A predicate expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Literal(Literal),
    /// Reference to a document field by internal name
    Field(String),
    /// Binary comparison
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// `field IN (values...)`
    In {
        expr: Box<Expr>,
        values: Vec<Literal>,
        negated: bool,
    },
    /// `field LIKE 'pattern'`, `%` and `_` wildcards
    Like {
        expr: Box<Expr>,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    /// IS NULL / IS NOT NULL
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// BETWEEN expression, bounds inclusive
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Expr {
    /// Names of every field referenced by this expression, in order of
    /// first appearance.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    /// Point every reference to field `from` at `to`, returning whether
    /// anything changed
    pub fn rename_field(&mut self, from: &str, to: &str) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Field(name) => {
                if name == from {
                    *name = to.to_string();
                    true
                } else {
                    false
                }
            }
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                let left = left.rename_field(from, to);
                right.rename_field(from, to) || left
            }
            Expr::Not(expr)
            | Expr::In { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::IsNull { expr, .. } => expr.rename_field(from, to),
            Expr::Between { expr, low, high, .. } => {
                let mut changed = expr.rename_field(from, to);
                changed |= low.rename_field(from, to);
                high.rename_field(from, to) || changed
            }
        }
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Not(expr)
            | Expr::In { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::IsNull { expr, .. } => expr.collect_fields(out),
            Expr::Between { expr, low, high, .. } => {
                expr.collect_fields(out);
                low.collect_fields(out);
                high.collect_fields(out);
            }
        }
    }
}

// ============================================================================
// Rendering back to source text
// ============================================================================

/// Operand of a comparison: anything compound goes in parentheses
struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::Literal(_) | Expr::Field(_) => write!(f, "{}", self.0),
            other => write!(f, "({})", other),
        }
    }
}

fn not_prefix(negated: bool) -> &'static str {
    if negated { "NOT " } else { "" }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{}", literal),
            Expr::Field(name) => f.write_str(name),
            Expr::Compare { left, op, right } => {
                write!(f, "{} {} {}", Operand(left), op, Operand(right))
            }
            Expr::And(left, right) => write!(f, "({} AND {})", left, right),
            Expr::Or(left, right) => write!(f, "({} OR {})", left, right),
            Expr::Not(expr) => write!(f, "NOT {}", Operand(expr)),
            Expr::In { expr, values, negated } => {
                let values: Vec<String> = values.iter().map(Literal::to_string).collect();
                write!(f, "{} {}IN ({})", Operand(expr), not_prefix(*negated), values.join(", "))
            }
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
                negated,
            } => {
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(
                    f,
                    "{} {}{} {}",
                    Operand(expr),
                    not_prefix(*negated),
                    op,
                    Literal::String(pattern.clone())
                )
            }
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", Operand(expr), not_prefix(*negated))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                Operand(expr),
                not_prefix(*negated),
                Operand(low),
                Operand(high)
            ),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        })
    }
}
