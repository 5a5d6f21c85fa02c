//! TQL Parser using nom
//!
//! Parses predicate strings into AST nodes. Precedence, loosest first:
//! `OR`, `AND`, `NOT`, then comparisons.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, none_of, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use crate::ast::*;
use crate::error::ParseError;

/// Parse a complete predicate, rejecting trailing input
pub fn parse_predicate(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    let (remaining, parsed) = expr(input).map_err(|e| ParseError::from_nom(input, e))?;

    let rest = remaining.trim();
    if !rest.is_empty() {
        return Err(ParseError::Trailing {
            rest: rest.to_string(),
            position: input.len() - remaining.trim_start().len(),
        });
    }

    Ok(parsed)
}

// ============================================================================
// Boolean structure
// ============================================================================

fn expr(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace1, keyword("OR"), multispace1)),
        and_expr,
    ))(input)?;

    Ok((input, rest.into_iter().fold(first, |acc, e| Expr::Or(Box::new(acc), Box::new(e)))))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace1, keyword("AND"), multispace1)),
        not_expr,
    ))(input)?;

    Ok((input, rest.into_iter().fold(first, |acc, e| Expr::And(Box::new(acc), Box::new(e)))))
}

fn not_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(pair(keyword("NOT"), multispace1), not_expr),
            |e| Expr::Not(Box::new(e)),
        ),
        comparison_expr,
    ))(input)
}

// ============================================================================
// Comparisons
// ============================================================================

fn comparison_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        is_null_expr,
        like_expr,
        in_expr,
        between_expr,
        binary_comparison,
    ))(input)
}

fn binary_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = primary_expr(input)?;
    let (input, rest) = opt(tuple((
        multispace0,
        alt((
            value(CompareOp::Eq, tag("=")),
            value(CompareOp::Ne, alt((tag("!="), tag("<>")))),
            value(CompareOp::Le, tag("<=")),
            value(CompareOp::Lt, tag("<")),
            value(CompareOp::Ge, tag(">=")),
            value(CompareOp::Gt, tag(">")),
        )),
        multispace0,
        primary_expr,
    )))(input)?;

    match rest {
        Some((_, op, _, right)) => Ok((input, Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })),
        None => Ok((input, left)),
    }
}

fn is_null_expr(input: &str) -> IResult<&str, Expr> {
    let (input, e) = primary_expr(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = keyword("IS")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(pair(keyword("NOT"), multispace1))(input)?;
    let (input, _) = keyword("NULL")(input)?;

    Ok((input, Expr::IsNull {
        expr: Box::new(e),
        negated: negated.is_some(),
    }))
}

fn like_expr(input: &str) -> IResult<&str, Expr> {
    let (input, e) = primary_expr(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(pair(keyword("NOT"), multispace1))(input)?;
    let (input, case_insensitive) = alt((
        value(true, keyword("ILIKE")),
        value(false, keyword("LIKE")),
    ))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, pattern) = string_literal(input)?;

    Ok((input, Expr::Like {
        expr: Box::new(e),
        pattern,
        case_insensitive,
        negated: negated.is_some(),
    }))
}

fn in_expr(input: &str) -> IResult<&str, Expr> {
    let (input, e) = primary_expr(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(pair(keyword("NOT"), multispace1))(input)?;
    let (input, _) = keyword("IN")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, values) = delimited(
        pair(char('('), multispace0),
        separated_list1(tuple((multispace0, char(','), multispace0)), literal),
        pair(multispace0, char(')')),
    )(input)?;

    Ok((input, Expr::In {
        expr: Box::new(e),
        values,
        negated: negated.is_some(),
    }))
}

fn between_expr(input: &str) -> IResult<&str, Expr> {
    let (input, e) = primary_expr(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(pair(keyword("NOT"), multispace1))(input)?;
    let (input, _) = keyword("BETWEEN")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, low) = primary_expr(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = keyword("AND")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, high) = primary_expr(input)?;

    Ok((input, Expr::Between {
        expr: Box::new(e),
        low: Box::new(low),
        high: Box::new(high),
        negated: negated.is_some(),
    }))
}

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(
            pair(char('('), multispace0),
            expr,
            pair(multispace0, char(')')),
        ),
        map(literal, Expr::Literal),
        map(identifier, Expr::Field),
    ))(input)
}

// ============================================================================
// Primitives
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive keyword that must not run into an identifier
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

/// Column names may start with a digit (`2020_total`); plain numbers are
/// taken by `literal` first
fn identifier(input: &str) -> IResult<&str, String> {
    map(take_while1(is_ident_char), String::from)(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        value(Literal::Null, keyword("NULL")),
        value(Literal::Bool(true), keyword("true")),
        value(Literal::Bool(false), keyword("false")),
        map(float_literal, Literal::Float),
        map(integer_literal, Literal::Int),
        map(string_literal, Literal::String),
    ))(input)
}

fn integer_literal(input: &str) -> IResult<&str, i64> {
    map_res(
        terminated(recognize(pair(opt(char('-')), digit1)), not(satisfy(is_ident_char))),
        |s: &str| s.parse::<i64>(),
    )(input)
}

fn float_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        terminated(
            recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
            not(satisfy(is_ident_char)),
        ),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        delimited(
            char('\''),
            map(
                many0(alt((
                    map(tag("''"), |_| "'".to_string()),
                    map(none_of("'"), |c| c.to_string()),
                ))),
                |v| v.join(""),
            ),
            char('\''),
        ),
        delimited(
            char('"'),
            map(
                many0(alt((
                    map(tag("\\\""), |_| "\"".to_string()),
                    map(tag("\\n"), |_| "\n".to_string()),
                    map(tag("\\t"), |_| "\t".to_string()),
                    map(tag("\\\\"), |_| "\\".to_string()),
                    map(none_of("\"\\"), |c| c.to_string()),
                ))),
                |v| v.join(""),
            ),
            char('"'),
        ),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Box<Expr> {
        Box::new(Expr::Field(name.to_string()))
    }

    #[test]
    fn test_parse_comparison_operators() {
        for (text, op) in [
            ("a = 1", CompareOp::Eq),
            ("a != 1", CompareOp::Ne),
            ("a <> 1", CompareOp::Ne),
            ("a < 1", CompareOp::Lt),
            ("a <= 1", CompareOp::Le),
            ("a > 1", CompareOp::Gt),
            ("a >= 1", CompareOp::Ge),
        ] {
            let parsed = parse_predicate(text).unwrap();
            assert_eq!(
                parsed,
                Expr::Compare {
                    left: field("a"),
                    op,
                    right: Box::new(Expr::Literal(Literal::Int(1))),
                },
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let parsed = parse_predicate("a = 1 OR b = 2 AND c = 3").unwrap();
        match parsed {
            Expr::Or(_, right) => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("Expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_and_parens() {
        let parsed = parse_predicate("NOT (status = 'void' OR total < 0)").unwrap();
        assert!(matches!(parsed, Expr::Not(_)));
    }

    #[test]
    fn test_keyword_prefix_is_an_identifier() {
        let parsed = parse_predicate("not_archived = true").unwrap();
        assert_eq!(
            parsed,
            Expr::Compare {
                left: field("not_archived"),
                op: CompareOp::Eq,
                right: Box::new(Expr::Literal(Literal::Bool(true))),
            }
        );
    }

    #[test]
    fn test_parse_in_like_null_between() {
        assert!(matches!(
            parse_predicate("country NOT IN ('RO', 'MD')").unwrap(),
            Expr::In { negated: true, ref values, .. } if values.len() == 2
        ));
        assert!(matches!(
            parse_predicate("email ILIKE '%@example.org'").unwrap(),
            Expr::Like { case_insensitive: true, negated: false, .. }
        ));
        assert!(matches!(
            parse_predicate("phone IS NOT NULL").unwrap(),
            Expr::IsNull { negated: true, .. }
        ));
        assert!(matches!(
            parse_predicate("age BETWEEN 18 AND 65 AND active = true").unwrap(),
            Expr::And(left, _) if matches!(*left, Expr::Between { .. })
        ));
    }

    #[test]
    fn test_parse_literals() {
        let parsed = parse_predicate("price = -2.5").unwrap();
        assert!(matches!(
            parsed,
            Expr::Compare { ref right, .. } if **right == Expr::Literal(Literal::Float(-2.5))
        ));

        let parsed = parse_predicate("name = 'O''Brien'").unwrap();
        assert!(matches!(
            parsed,
            Expr::Compare { ref right, .. } if **right == Expr::Literal(Literal::String("O'Brien".into()))
        ));
    }

    #[test]
    fn test_trailing_content_reports_position() {
        let err = parse_predicate("a = 1 b").unwrap_err();
        assert_eq!(err.position(), Some(6));
    }

    #[test]
    fn test_column_names_may_start_with_digits() {
        assert_eq!(
            parse_predicate("2020_total >= 100").unwrap(),
            Expr::Compare {
                left: field("2020_total"),
                op: CompareOp::Ge,
                right: Box::new(Expr::Literal(Literal::Int(100))),
            }
        );
        assert_eq!(
            parse_predicate("total != 2020_total").unwrap(),
            Expr::Compare {
                left: field("total"),
                op: CompareOp::Ne,
                right: field("2020_total"),
            }
        );
        // a bare number is still a literal
        assert_eq!(
            parse_predicate("total = 2020").unwrap(),
            Expr::Compare {
                left: field("total"),
                op: CompareOp::Eq,
                right: Box::new(Expr::Literal(Literal::Int(2020))),
            }
        );
    }
}
