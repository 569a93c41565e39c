// Incremental SQL lexer.
//
// Converts SQL text into tokens on demand. Uses memchr for accelerated
// quote scanning and tracks line/column for error reporting. Keyword
// recognition is delegated to a dialect `KeywordTable`.

use memchr::{memchr, memchr2};

use crate::dialect::KeywordTable;
use crate::error::ParseError;
use crate::token::{QuoteStyle, Span, Token, TokenKind};

/// SQL lexer positioned on a current token.
///
/// `next_token` advances and returns the new current token;
/// `current_token` peeks without advancing. Whitespace and comments never
/// surface as tokens.
#[derive(Clone)]
pub struct Lexer<'a> {
    /// The source bytes (UTF-8).
    src: &'a [u8],
    /// Current byte offset into src.
    pos: usize,
    /// Current line number (1-based).
    line: u32,
    /// Current column number (1-based, counted in characters).
    col: u32,
    keywords: &'a dyn KeywordTable,
    current: Token,
}

impl<'a> Lexer<'a> {
    /// Create a lexer and read the first token.
    pub fn new(source: &'a str, keywords: &'a dyn KeywordTable) -> Result<Self, ParseError> {
        let mut lexer = Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            keywords,
            current: Token {
                kind: TokenKind::Eof,
                span: Span::ZERO,
                line: 1,
                col: 1,
            },
        };
        lexer.current = lexer.lex()?;
        Ok(lexer)
    }

    /// Tokenize the entire input, including the trailing `Eof`.
    pub fn tokenize(source: &str, keywords: &dyn KeywordTable) -> Result<Vec<Token>, ParseError> {
        let mut lexer = Lexer::new(source, keywords)?;
        let mut tokens = vec![lexer.current_token().clone()];
        while lexer.current_token().kind != TokenKind::Eof {
            tokens.push(lexer.next_token()?.clone());
        }
        Ok(tokens)
    }

    /// The token the lexer is positioned on.
    #[must_use]
    pub fn current_token(&self) -> &Token {
        &self.current
    }

    /// Advance past the current token and return the next one.
    ///
    /// Once `Eof` is reached, further calls keep returning `Eof`.
    pub fn next_token(&mut self) -> Result<&Token, ParseError> {
        if self.current.kind != TokenKind::Eof {
            self.current = self.lex()?;
        }
        Ok(&self.current)
    }

    /// The keyword table this lexer was built with.
    #[must_use]
    pub fn keywords(&self) -> &'a dyn KeywordTable {
        self.keywords
    }

    fn lex(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace_and_comments()?;

        let start = self.pos;
        let start_line = self.line;
        let start_col = self.col;

        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::point(start),
                line: start_line,
                col: start_col,
            });
        };

        let kind = match ch {
            b'\'' => self.lex_string(b'\'')?,
            b'"' if self.keywords.double_quoted_strings() => self.lex_string(b'"')?,
            b'"' => self.lex_delimited_id(b'"', QuoteStyle::Double)?,
            b'`' => self.lex_delimited_id(b'`', QuoteStyle::Backtick)?,
            b'[' => self.lex_delimited_id(b']', QuoteStyle::Bracket)?,

            b'0'..=b'9' => self.lex_number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number(),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_identifier(),
            c if c >= 0x80 => self.lex_identifier(),

            b'?' => self.single(TokenKind::Question),
            b'@' => self.lex_variable()?,

            b'+' => self.single(TokenKind::Plus),
            b'*' => self.single(TokenKind::Star),
            b'/' => self.single(TokenKind::Slash),
            b'%' => self.single(TokenKind::Percent),
            b'&' => self.single(TokenKind::Ampersand),
            b'^' => self.single(TokenKind::Caret),
            b'~' => self.single(TokenKind::Tilde),
            b',' => self.single(TokenKind::Comma),
            b';' => self.single(TokenKind::Semicolon),
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b'.' => self.single(TokenKind::Dot),
            b'-' => self.single(TokenKind::Minus),

            b'<' => self.lex_lt(),
            b'>' => self.lex_gt(),
            b'=' => self.lex_eq(),
            b'!' => self.lex_bang()?,
            b'|' => self.lex_pipe(),
            b':' => self.lex_colon()?,

            _ => {
                let text = self.char_at(start);
                return Err(ParseError::at_position(
                    format!("unexpected character '{text}'"),
                    start,
                    start_line,
                    start_col,
                ));
            }
        };

        Ok(Token {
            kind,
            span: Span::new(start, self.pos),
            line: start_line,
            col: start_col,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn advance(&mut self) -> u8 {
        let ch = self.src[self.pos];
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else if ch & 0xC0 != 0x80 {
            // UTF-8 continuation bytes do not start a new column.
            self.col += 1;
        }
        ch
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn char_at(&self, pos: usize) -> String {
        let end = (pos + 1..=self.src.len())
            .find(|&e| std::str::from_utf8(&self.src[pos..e]).is_ok())
            .unwrap_or(self.src.len());
        String::from_utf8_lossy(&self.src[pos..end]).into_owned()
    }

    fn error_here(&self, message: String, start: usize, line: u32, col: u32) -> ParseError {
        ParseError::at_position(message, start, line, col)
    }

    /// Skip whitespace, line comments (`--`, and `#` where the dialect allows),
    /// and nested block comments (`/* */`).
    fn skip_whitespace_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
                self.advance();
            }

            let Some(ch) = self.peek() else {
                return Ok(());
            };

            let line_comment = (ch == b'-' && self.peek_at(1) == Some(b'-'))
                || (ch == b'#' && self.keywords.hash_comments());
            if line_comment {
                match memchr(b'\n', &self.src[self.pos..]) {
                    Some(offset) => self.advance_by(offset),
                    None => self.advance_by(self.src.len() - self.pos),
                }
                continue;
            }

            if ch == b'/' && self.peek_at(1) == Some(b'*') {
                let (start, line, col) = (self.pos, self.line, self.col);
                self.advance_by(2);
                let mut depth = 1u32;
                while depth > 0 {
                    match (self.peek(), self.peek_at(1)) {
                        (None, _) => {
                            return Err(self.error_here(
                                "unterminated block comment".to_owned(),
                                start,
                                line,
                                col,
                            ));
                        }
                        (Some(b'/'), Some(b'*')) => {
                            self.advance_by(2);
                            depth += 1;
                        }
                        (Some(b'*'), Some(b'/')) => {
                            self.advance_by(2);
                            depth -= 1;
                        }
                        _ => {
                            self.advance();
                        }
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    // -----------------------------------------------------------------------
    // Literal tokenizers
    // -----------------------------------------------------------------------

    /// Lex a quoted string literal. A doubled quote is an escaped quote;
    /// backslash escapes apply where the dialect enables them.
    fn lex_string(&mut self, quote: u8) -> Result<TokenKind, ParseError> {
        let (start, line, col) = (self.pos, self.line, self.col);
        self.advance(); // opening quote

        let backslash = self.keywords.backslash_escapes();
        let mut value = Vec::new();
        loop {
            let remaining = &self.src[self.pos..];
            let found = if backslash {
                memchr2(quote, b'\\', remaining)
            } else {
                memchr(quote, remaining)
            };
            let Some(offset) = found else {
                self.advance_by(remaining.len());
                return Err(self.error_here(
                    format!("unterminated string literal starting at byte {start}"),
                    start,
                    line,
                    col,
                ));
            };
            value.extend_from_slice(&remaining[..offset]);
            self.advance_by(offset);

            if self.advance() == b'\\' {
                let Some(escaped) = self.peek() else {
                    return Err(self.error_here(
                        format!("unterminated string literal starting at byte {start}"),
                        start,
                        line,
                        col,
                    ));
                };
                self.advance();
                value.push(match escaped {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => 0,
                    other => other,
                });
            } else if self.peek() == Some(quote) {
                value.push(quote);
                self.advance();
            } else {
                return Ok(TokenKind::String(
                    String::from_utf8_lossy(&value).into_owned(),
                ));
            }
        }
    }

    /// Lex a delimited identifier closed by `close`. Doubling the closing
    /// character escapes it, except for brackets.
    fn lex_delimited_id(&mut self, close: u8, style: QuoteStyle) -> Result<TokenKind, ParseError> {
        let (start, line, col) = (self.pos, self.line, self.col);
        self.advance(); // opening delimiter

        let mut value = Vec::new();
        loop {
            let remaining = &self.src[self.pos..];
            let Some(offset) = memchr(close, remaining) else {
                self.advance_by(remaining.len());
                return Err(self.error_here(
                    format!("unterminated quoted identifier starting at byte {start}"),
                    start,
                    line,
                    col,
                ));
            };
            value.extend_from_slice(&remaining[..offset]);
            self.advance_by(offset + 1);

            if style != QuoteStyle::Bracket && self.peek() == Some(close) {
                value.push(close);
                self.advance();
            } else {
                return Ok(TokenKind::QuotedId(
                    String::from_utf8_lossy(&value).into_owned(),
                    style,
                ));
            }
        }
    }

    /// Lex a number: integer, hex integer, or float. Integers that do not
    /// fit in i64 become floats.
    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;

        if self.src[self.pos] == b'0' && self.peek_at(1).is_some_and(|c| c == b'x' || c == b'X') {
            let hex_start = self.pos + 2;
            let hex_len = self.src[hex_start..]
                .iter()
                .take_while(|c| c.is_ascii_hexdigit())
                .count();
            if hex_len > 0 {
                self.advance_by(2 + hex_len);
                let hex = String::from_utf8_lossy(&self.src[hex_start..self.pos]);
                return i64::from_str_radix(&hex, 16)
                    .map_or_else(|_| TokenKind::Float(f64::INFINITY), TokenKind::Integer);
            }
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance(); // dot
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance_by(1 + sign);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text = String::from_utf8_lossy(&self.src[start..self.pos]);
        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                return TokenKind::Integer(v);
            }
        }
        TokenKind::Float(text.parse::<f64>().unwrap_or(f64::NAN))
    }

    /// Lex an identifier or keyword.
    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        self.advance(); // first character already validated

        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80)
        {
            self.advance();
        }

        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.keywords.lookup(&text).unwrap_or(TokenKind::Id(text))
    }

    /// Lex `@name` or `@@name`.
    fn lex_variable(&mut self) -> Result<TokenKind, ParseError> {
        let (start, line, col) = (self.pos, self.line, self.col);
        self.advance(); // @
        if self.peek() == Some(b'@') {
            self.advance();
        }
        let name_start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c == b'.')
        {
            self.advance();
        }
        if self.pos == name_start {
            return Err(self.error_here(
                "empty variable name after '@'".to_owned(),
                start,
                line,
                col,
            ));
        }
        let name = String::from_utf8_lossy(&self.src[start + 1..self.pos]).into_owned();
        Ok(TokenKind::Variable(name))
    }

    // -----------------------------------------------------------------------
    // Multi-character operator tokenizers
    // -----------------------------------------------------------------------

    /// Lex `<`, `<=`, `<>`, `<=>`, or `<<`.
    fn lex_lt(&mut self) -> TokenKind {
        self.advance(); // <
        match self.peek() {
            Some(b'=') => {
                self.advance();
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::NullSafeEq
                } else {
                    TokenKind::Le
                }
            }
            Some(b'>') => self.single(TokenKind::LtGt),
            Some(b'<') => self.single(TokenKind::ShiftLeft),
            _ => TokenKind::Lt,
        }
    }

    /// Lex `>`, `>=`, or `>>`.
    fn lex_gt(&mut self) -> TokenKind {
        self.advance(); // >
        match self.peek() {
            Some(b'=') => self.single(TokenKind::Ge),
            Some(b'>') => self.single(TokenKind::ShiftRight),
            _ => TokenKind::Gt,
        }
    }

    /// Lex `=` or `==`.
    fn lex_eq(&mut self) -> TokenKind {
        self.advance(); // =
        if self.peek() == Some(b'=') {
            self.single(TokenKind::EqEq)
        } else {
            TokenKind::Eq
        }
    }

    /// Lex `!=`.
    fn lex_bang(&mut self) -> Result<TokenKind, ParseError> {
        let (start, line, col) = (self.pos, self.line, self.col);
        self.advance(); // !
        if self.peek() == Some(b'=') {
            Ok(self.single(TokenKind::Ne))
        } else {
            Err(self.error_here(
                "unexpected '!', did you mean '!='?".to_owned(),
                start,
                line,
                col,
            ))
        }
    }

    /// Lex `|` or `||`.
    fn lex_pipe(&mut self) -> TokenKind {
        self.advance(); // |
        if self.peek() == Some(b'|') {
            self.single(TokenKind::Concat)
        } else {
            TokenKind::Pipe
        }
    }

    /// Lex `:=`.
    fn lex_colon(&mut self) -> Result<TokenKind, ParseError> {
        let (start, line, col) = (self.pos, self.line, self.col);
        self.advance(); // :
        if self.peek() == Some(b'=') {
            Ok(self.single(TokenKind::ColonEq))
        } else {
            Err(self.error_here("unexpected character ':'".to_owned(), start, line, col))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{GenericKeywords, MySqlKeywords, SqlServerKeywords};

    fn kinds_with(src: &str, keywords: &dyn KeywordTable) -> Vec<TokenKind> {
        Lexer::tokenize(src, keywords)
            .expect("input should lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        kinds_with(src, &MySqlKeywords)
    }

    #[test]
    fn test_lex_select_with_positions() {
        let tokens = Lexer::tokenize("SELECT * FROM orders", &MySqlKeywords).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::KwSelect);
        assert_eq!(tokens[0].span, Span::new(0, 6));
        assert_eq!(tokens[3].kind, TokenKind::Id("orders".to_owned()));
        assert_eq!(tokens[3].span, Span::new(14, 20));
        assert_eq!(tokens[3].col, 15);
        assert_eq!(tokens[4].kind, TokenKind::Eof);
        assert_eq!(tokens[4].span, Span::point(20));
    }

    #[test]
    fn test_lex_current_and_next() {
        let mut lexer = Lexer::new("a , b", &GenericKeywords).unwrap();
        assert_eq!(lexer.current_token().kind, TokenKind::Id("a".to_owned()));
        assert_eq!(lexer.current_token().kind, TokenKind::Id("a".to_owned()));
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Comma);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Id("b".to_owned()));
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = kinds("42 0xFF 3.5 1e3 .5 99999999999999999999");
        assert_eq!(tokens[0], TokenKind::Integer(42));
        assert_eq!(tokens[1], TokenKind::Integer(255));
        assert!(matches!(tokens[2], TokenKind::Float(v) if (v - 3.5).abs() < 1e-12));
        assert!(matches!(tokens[3], TokenKind::Float(v) if (v - 1000.0).abs() < 1e-9));
        assert!(matches!(tokens[4], TokenKind::Float(v) if (v - 0.5).abs() < 1e-12));
        assert!(matches!(tokens[5], TokenKind::Float(v) if v > 9.0e19));
    }

    #[test]
    fn test_lex_strings_and_escapes() {
        assert_eq!(
            kinds("'it''s'")[0],
            TokenKind::String("it's".to_owned())
        );
        assert_eq!(
            kinds(r"'a\'b'")[0],
            TokenKind::String("a'b".to_owned())
        );
        // Backslash is literal outside MySQL.
        assert_eq!(
            kinds_with(r"'a\b'", &SqlServerKeywords)[0],
            TokenKind::String(r"a\b".to_owned())
        );
    }

    #[test]
    fn test_lex_double_quotes_per_dialect() {
        assert_eq!(
            kinds("\"abc\"")[0],
            TokenKind::String("abc".to_owned())
        );
        assert_eq!(
            kinds_with("\"abc\"", &GenericKeywords)[0],
            TokenKind::QuotedId("abc".to_owned(), QuoteStyle::Double)
        );
    }

    #[test]
    fn test_lex_quoted_identifiers() {
        let tokens = Lexer::tokenize("`t_order` [t order]", &SqlServerKeywords).unwrap();
        assert_eq!(
            tokens[0].kind,
            TokenKind::QuotedId("t_order".to_owned(), QuoteStyle::Backtick)
        );
        assert_eq!(tokens[0].span, Span::new(0, 9));
        assert_eq!(
            tokens[1].kind,
            TokenKind::QuotedId("t order".to_owned(), QuoteStyle::Bracket)
        );
    }

    #[test]
    fn test_lex_comments_skipped() {
        let tokens = kinds("SELECT -- trailing\n 1 /* a /* nested */ b */ # hash\n , 2");
        assert_eq!(
            tokens,
            vec![
                TokenKind::KwSelect,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_lex_hash_is_error_outside_mysql() {
        let err = Lexer::tokenize("SELECT # x", &SqlServerKeywords).unwrap_err();
        assert!(err.message.contains("unexpected character '#'"));
        assert_eq!(err.span.start, 7);
    }

    #[test]
    fn test_lex_unterminated_literal_is_error() {
        let err = Lexer::tokenize("SELECT 'abc", &MySqlKeywords).unwrap_err();
        assert!(err.message.starts_with("unterminated string literal"));
        assert_eq!((err.line, err.col), (1, 8));

        let err = Lexer::tokenize("SELECT `abc", &MySqlKeywords).unwrap_err();
        assert!(err.message.starts_with("unterminated quoted identifier"));

        let err = Lexer::tokenize("SELECT /* open", &MySqlKeywords).unwrap_err();
        assert_eq!(err.message, "unterminated block comment");
    }

    #[test]
    fn test_lex_operators() {
        let tokens = kinds("<=> <= <> != >= << >> || := ==");
        assert_eq!(
            tokens,
            vec![
                TokenKind::NullSafeEq,
                TokenKind::Le,
                TokenKind::LtGt,
                TokenKind::Ne,
                TokenKind::Ge,
                TokenKind::ShiftLeft,
                TokenKind::ShiftRight,
                TokenKind::Concat,
                TokenKind::ColonEq,
                TokenKind::EqEq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_variables_and_placeholders() {
        let tokens = kinds("@uid @@session.autocommit ?");
        assert_eq!(tokens[0], TokenKind::Variable("uid".to_owned()));
        assert_eq!(tokens[1], TokenKind::Variable("@session.autocommit".to_owned()));
        assert_eq!(tokens[2], TokenKind::Question);
    }

    #[test]
    fn test_lex_line_tracking_and_utf8_columns() {
        let tokens = Lexer::tokenize("SELECT\n  'é', x", &MySqlKeywords).unwrap();
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
        // 'é' is three characters wide, then the comma.
        assert_eq!((tokens[2].line, tokens[2].col), (2, 6));
    }

    #[test]
    fn test_lex_dialect_keywords() {
        assert_eq!(kinds("limit")[0], TokenKind::KwLimit);
        assert_eq!(
            kinds_with("limit", &SqlServerKeywords)[0],
            TokenKind::Id("limit".to_owned())
        );
        assert_eq!(kinds_with("TOP", &SqlServerKeywords)[0], TokenKind::KwTop);
    }
}
