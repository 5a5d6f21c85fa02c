//! TQL - Tabula Query Language
//!
//! A small predicate language for selecting entries by the values in
//! their documents. It is used for chart filter predicates and for the
//! free-form `q` parameter of entry listings.
//!
//! # Syntax Overview
//!
//! ```tql
//! status = 'paid' AND total > 10
//! country IN ('RO', 'MD') OR NOT archived = true
//! email LIKE '%@example.org'
//! name ILIKE 'ana%'
//! age BETWEEN 18 AND 65
//! phone IS NOT NULL
//! ```
//!
//! Field names are column internal names (`snake_case`). String literals
//! use single quotes (`''` escapes a quote) or double quotes with
//! backslash escapes.

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::ParseError;

/// Parse a predicate expression into an AST
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    parser::parse_predicate(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_equality() {
        let expr = parse("status = 'paid'").unwrap();
        assert!(matches!(expr, Expr::Compare { op: CompareOp::Eq, .. }));
    }

    #[test]
    fn test_parse_fields_collects_references() {
        let expr = parse("status = 'paid' AND (total > 10 OR country IN ('RO', 'MD'))").unwrap();
        let mut fields = expr.fields();
        fields.sort();
        assert_eq!(fields, vec!["country", "status", "total"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("status = ").is_err());
        assert_eq!(parse("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_reports_trailing_position() {
        let err = parse("age = 1 junk").unwrap_err();
        assert!(matches!(err, ParseError::Trailing { .. }));
        assert_eq!(err.position(), Some(8));
    }

    #[test]
    fn test_rendered_predicate_parses_back() {
        for text in [
            "status = 'O''Brien' AND (total > 10.0 OR country NOT IN ('RO', 'MD'))",
            "NOT (a IS NULL OR b ILIKE 'x%')",
            "2020_total BETWEEN -1 AND 2.5",
            "archived = false",
        ] {
            let expr = parse(text).unwrap();
            assert_eq!(parse(&expr.to_string()).unwrap(), expr, "{}", text);
        }
    }

    #[test]
    fn test_rename_field() {
        let mut expr = parse("region = 'north' OR (region IS NULL AND total > 1)").unwrap();
        assert!(expr.rename_field("region", "area"));
        assert_eq!(expr.fields(), vec!["area", "total"]);
        assert!(!expr.rename_field("region", "zone"));
    }
}
