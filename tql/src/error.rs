//! Errors reported by the TQL parser

use std::fmt;

/// Why a predicate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Blank input
    Empty,
    /// The grammar stopped matching at `position` (byte offset)
    Unexpected { near: String, position: usize },
    /// A full expression parsed but input remains after it
    Trailing { rest: String, position: usize },
}

impl ParseError {
    /// Byte offset of the offending input, when known
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::Empty => None,
            ParseError::Unexpected { position, .. } | ParseError::Trailing { position, .. } => Some(*position),
        }
    }

    /// Locate a nom failure inside `source`
    pub(crate) fn from_nom(source: &str, err: nom::Err<nom::error::Error<&str>>) -> Self {
        let remaining = match err {
            nom::Err::Incomplete(_) => "",
            nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        };
        ParseError::Unexpected {
            near: remaining.chars().take(20).collect(),
            position: source.len().saturating_sub(remaining.len()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty predicate"),
            ParseError::Unexpected { near, position } if near.is_empty() => {
                write!(f, "unexpected end of predicate at position {}", position)
            }
            ParseError::Unexpected { near, position } => {
                write!(f, "unexpected input {:?} at position {}", near, position)
            }
            ParseError::Trailing { rest, position } => {
                write!(f, "unexpected trailing content {:?} at position {}", rest, position)
            }
        }
    }
}

impl std::error::Error for ParseError {}
