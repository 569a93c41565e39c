use std::fmt;

use shardline_error::ShardError;

use crate::token::{Span, Token, TokenKind};

/// Parse error with source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    /// Error positioned at `token`.
    #[must_use]
    pub fn at(message: impl Into<String>, token: &Token) -> Self {
        Self {
            message: message.into(),
            span: token.span,
            line: token.line,
            col: token.col,
        }
    }

    /// `expected X, found Y` at the offending token.
    #[must_use]
    pub fn expected(what: &str, found: &Token) -> Self {
        Self::at(format!("expected {what}, found {}", found.kind), found)
    }

    /// Error at a raw lexer position.
    #[must_use]
    pub fn at_position(message: impl Into<String>, pos: usize, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            span: Span::point(pos),
            line,
            col,
        }
    }

    /// Whether this error was raised while looking for `kind`.
    #[must_use]
    pub fn is_expectation_of(&self, kind: &TokenKind) -> bool {
        self.message.starts_with(&format!("expected {kind}"))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for ShardError {
    fn from(err: ParseError) -> Self {
        Self::Parse {
            offset: err.span.start,
            line: err.line,
            col: err.col,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_message_and_conversion() {
        let tok = Token {
            kind: TokenKind::KwWhere,
            span: Span::new(14, 19),
            line: 1,
            col: 15,
        };
        let err = ParseError::expected(&TokenKind::KwSet.to_string(), &tok);
        assert_eq!(err.to_string(), "1:15: expected keyword SET, found keyword WHERE");
        assert!(err.is_expectation_of(&TokenKind::KwSet));

        let shard: ShardError = err.into();
        assert!(matches!(shard, ShardError::Parse { offset: 14, line: 1, col: 15, .. }));
    }
}
