// Token cursor shared by the clause parsers.
//
// Wraps the incremental lexer with the consume/expect helpers the clause
// parsers need, and owns the running placeholder count: every `?` that is
// consumed, by any parser, bumps `parameter_index`.

use shardline_types::DatabaseType;

use crate::dialect::KeywordTable;
use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::token::{QuoteStyle, Span, Token, TokenKind};

pub struct TokenCursor<'a> {
    sql: &'a str,
    lexer: Lexer<'a>,
    parameter_index: usize,
}

impl<'a> TokenCursor<'a> {
    /// Position a cursor on the first token of `sql`.
    pub fn new(sql: &'a str, keywords: &'a dyn KeywordTable) -> Result<Self, ParseError> {
        Ok(Self {
            sql,
            lexer: Lexer::new(sql, keywords)?,
            parameter_index: 0,
        })
    }

    #[must_use]
    pub fn sql(&self) -> &'a str {
        self.sql
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.lexer.keywords().database_type()
    }

    #[must_use]
    pub fn current(&self) -> &Token {
        self.lexer.current_token()
    }

    #[must_use]
    pub fn kind(&self) -> &TokenKind {
        &self.lexer.current_token().kind
    }

    /// Number of `?` placeholders consumed so far.
    #[must_use]
    pub fn parameter_index(&self) -> usize {
        self.parameter_index
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    /// Source text covered by `span`.
    #[must_use]
    pub fn text(&self, span: Span) -> &'a str {
        self.sql.get(span.start..span.end).unwrap_or("")
    }

    /// Kind of the token after the current one, without advancing.
    pub fn peek_next(&self) -> Result<TokenKind, ParseError> {
        let mut lookahead = self.lexer.clone();
        Ok(lookahead.next_token()?.kind.clone())
    }

    /// Consume the current token and return it.
    pub fn advance(&mut self) -> Result<Token, ParseError> {
        let consumed = self.lexer.current_token().clone();
        if consumed.kind == TokenKind::Question {
            self.parameter_index += 1;
        }
        self.lexer.next_token()?;
        Ok(consumed)
    }

    /// Whether the current token has the same variant as `kind`.
    #[must_use]
    pub fn check(&self, kind: &TokenKind) -> bool {
        self.kind().same_variant(kind)
    }

    #[must_use]
    pub fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.iter().any(|k| self.check(k))
    }

    /// Consume the current token if it matches `kind`.
    pub fn eat(&mut self, kind: &TokenKind) -> Result<bool, ParseError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume the current token if it matches any of `kinds`.
    pub fn eat_any(&mut self, kinds: &[TokenKind]) -> Result<bool, ParseError> {
        if self.check_any(kinds) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume any run of tokens drawn from `kinds`.
    pub fn skip_all(&mut self, kinds: &[TokenKind]) -> Result<(), ParseError> {
        while self.check_any(kinds) {
            self.advance()?;
        }
        Ok(())
    }

    /// Consume a token of `kind` or fail with an expected-vs-actual error.
    pub fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.expected(&kind.to_string()))
        }
    }

    /// Consume one of `kinds` or fail.
    pub fn expect_any(&mut self, kinds: &[TokenKind], what: &str) -> Result<Token, ParseError> {
        if self.check_any(kinds) {
            self.advance()
        } else {
            Err(self.expected(what))
        }
    }

    /// Expected-vs-actual error at the current token.
    #[must_use]
    pub fn expected(&self, what: &str) -> ParseError {
        ParseError::expected(what, self.current())
    }

    /// Consume an identifier, returning its unquoted name, span, and quoting.
    pub fn expect_identifier(&mut self) -> Result<Identifier, ParseError> {
        match self.kind() {
            TokenKind::Id(_) | TokenKind::QuotedId(..) => {
                let token = self.advance()?;
                Ok(Identifier::from_token(token))
            }
            _ => Err(self.expected("identifier")),
        }
    }

    /// Skip a balanced parenthesized group if the cursor is on `(`.
    pub fn skip_parentheses(&mut self) -> Result<(), ParseError> {
        if !self.check(&TokenKind::LeftParen) {
            return Ok(());
        }
        let open = self.current().clone();
        let mut depth = 0usize;
        loop {
            match self.kind() {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth -= 1,
                TokenKind::Eof => {
                    return Err(ParseError::at("unbalanced parentheses", &open));
                }
                _ => {}
            }
            self.advance()?;
            if depth == 0 {
                return Ok(());
            }
        }
    }
}

/// An identifier token reduced to what rewriting needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
    pub quote: Option<QuoteStyle>,
}

impl Identifier {
    /// Build from an `Id` or `QuotedId` token. Other kinds yield an empty name.
    #[must_use]
    pub fn from_token(token: Token) -> Self {
        let (name, quote) = match token.kind {
            TokenKind::Id(name) => (name, None),
            TokenKind::QuotedId(name, style) => (name, Some(style)),
            _ => (String::new(), None),
        };
        Self {
            name,
            span: token.span,
            quote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MySqlKeywords;

    #[test]
    fn test_advance_counts_placeholders() {
        let mut cursor = TokenCursor::new("a = ? AND b IN (?, ?)", &MySqlKeywords).unwrap();
        while !cursor.is_eof() {
            cursor.advance().unwrap();
        }
        assert_eq!(cursor.parameter_index(), 3);
    }

    #[test]
    fn test_expect_reports_expected_and_found() {
        let mut cursor = TokenCursor::new("UPDATE t WHERE", &MySqlKeywords).unwrap();
        cursor.expect(&TokenKind::KwUpdate).unwrap();
        cursor.expect_identifier().unwrap();
        let err = cursor.expect(&TokenKind::KwSet).unwrap_err();
        assert_eq!(err.message, "expected keyword SET, found keyword WHERE");
        assert_eq!(err.span.start, 9);
    }

    #[test]
    fn test_peek_next_does_not_advance() {
        let cursor = TokenCursor::new("LEFT (x)", &MySqlKeywords).unwrap();
        assert_eq!(cursor.peek_next().unwrap(), TokenKind::LeftParen);
        assert_eq!(cursor.kind(), &TokenKind::KwLeft);
    }

    #[test]
    fn test_skip_parentheses_balanced() {
        let mut cursor = TokenCursor::new("(a, (b, ?), c) d", &MySqlKeywords).unwrap();
        cursor.skip_parentheses().unwrap();
        assert_eq!(cursor.kind(), &TokenKind::Id("d".to_owned()));
        assert_eq!(cursor.parameter_index(), 1);

        let mut cursor = TokenCursor::new("(a, (b)", &MySqlKeywords).unwrap();
        assert!(cursor.skip_parentheses().is_err());
    }

    #[test]
    fn test_identifier_keeps_quote_style() {
        let mut cursor = TokenCursor::new("`orders`", &MySqlKeywords).unwrap();
        let ident = cursor.expect_identifier().unwrap();
        assert_eq!(ident.name, "orders");
        assert_eq!(ident.quote, Some(QuoteStyle::Backtick));
        assert_eq!(cursor.text(ident.span), "`orders`");
    }
}
