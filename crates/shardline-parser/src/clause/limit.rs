//! Pagination clauses.
//!
//! Three surface forms are normalized into one [`Limit`]:
//!
//! - MySQL `LIMIT n`, `LIMIT o, n`, `LIMIT n OFFSET o`
//! - SQL Server `OFFSET o ROWS [FETCH NEXT n ROWS ONLY]`
//! - SQL Server `TOP n` / `TOP (n)`
//!
//! Literal bounds also produce rewrite tokens so that the router can widen
//! pagination per shard. Placeholder bounds are rewritten through the
//! parameter list instead.

use crate::cursor::TokenCursor;
use crate::error::ParseError;
use crate::model::{Limit, LimitValue, RewriteToken, SqlStatement};
use crate::token::{Span, TokenKind};
use shardline_types::SqlKind;

#[derive(Debug, Clone, Copy)]
struct Operand {
    value: LimitValue,
    span: Span,
}

fn operand(cursor: &mut TokenCursor<'_>) -> Result<Operand, ParseError> {
    let token = cursor.current().clone();
    let value = match token.kind {
        TokenKind::Integer(v) if v >= 0 => LimitValue::Literal(v),
        TokenKind::Question => LimitValue::Placeholder(cursor.parameter_index()),
        _ => return Err(cursor.expected("non-negative integer or '?'")),
    };
    cursor.advance()?;
    Ok(Operand {
        value,
        span: token.span,
    })
}

fn record(
    stmt: &mut SqlStatement,
    row_count: Option<Operand>,
    offset: Option<Operand>,
    rewritable: bool,
) {
    if let Some(Operand {
        value: LimitValue::Literal(value),
        span,
    }) = offset
    {
        stmt.tokens.push(RewriteToken::Offset { span, value });
    }
    if let Some(Operand {
        value: LimitValue::Literal(value),
        span,
    }) = row_count
    {
        stmt.tokens.push(RewriteToken::RowCount { span, value });
    }
    stmt.limit = Some(Limit {
        row_count: row_count.map(|o| o.value),
        offset: offset.map(|o| o.value),
        rewritable: rewritable && stmt.kind == SqlKind::Select,
    });
}

/// MySQL `LIMIT`. With `record == false` the clause is only consumed.
pub fn parse_limit(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwLimit)?;
    let first = operand(cursor)?;
    let (row_count, offset) = if cursor.eat(&TokenKind::Comma)? {
        (operand(cursor)?, Some(first))
    } else if cursor.eat(&TokenKind::KwOffset)? {
        (first, Some(operand(cursor)?))
    } else {
        (first, None)
    };
    if record_limit {
        record(stmt, Some(row_count), offset, true);
    }
    Ok(())
}

/// `[OFFSET o [ROW|ROWS]] [FETCH FIRST|NEXT n ROW|ROWS ONLY]`; at least one
/// part must be present.
pub fn parse_offset_fetch(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    let mut offset = None;
    if cursor.eat(&TokenKind::KwOffset)? {
        offset = Some(operand(cursor)?);
        cursor.eat_any(&[TokenKind::KwRow, TokenKind::KwRows])?;
    }
    let mut row_count = None;
    if cursor.eat(&TokenKind::KwFetch)? {
        cursor.expect_any(&[TokenKind::KwFirst, TokenKind::KwNext], "FIRST or NEXT")?;
        row_count = Some(operand(cursor)?);
        cursor.expect_any(&[TokenKind::KwRow, TokenKind::KwRows], "ROW or ROWS")?;
        cursor.expect(&TokenKind::KwOnly)?;
    }
    if offset.is_none() && row_count.is_none() {
        return Err(cursor.expected("OFFSET or FETCH"));
    }
    if record_limit {
        record(stmt, row_count, offset, true);
    }
    Ok(())
}

/// SQL Server `TOP n`, `TOP (n)`, optionally `PERCENT` and `WITH TIES`.
///
/// `TOP (expr)` with a non-trivial expression is consumed but not recorded.
pub fn parse_top(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwTop)?;
    let row_count = if cursor.check(&TokenKind::LeftParen) {
        let simple = matches!(
            cursor.peek_next()?,
            TokenKind::Integer(_) | TokenKind::Question
        );
        if simple {
            cursor.advance()?;
            let value = operand(cursor)?;
            if cursor.check(&TokenKind::RightParen) {
                cursor.advance()?;
                Some(value)
            } else {
                skip_to_close(cursor)?;
                None
            }
        } else {
            cursor.skip_parentheses()?;
            None
        }
    } else {
        Some(operand(cursor)?)
    };
    let percent = matches!(cursor.kind(), TokenKind::Id(w) if w.eq_ignore_ascii_case("PERCENT"));
    if percent {
        cursor.advance()?;
    }
    if cursor.check(&TokenKind::KwWith)
        && matches!(cursor.peek_next()?, TokenKind::Id(w) if w.eq_ignore_ascii_case("TIES"))
    {
        cursor.advance()?;
        cursor.advance()?;
    }
    if record_limit {
        if let Some(row_count) = row_count {
            record(stmt, Some(row_count), None, !percent);
        }
    }
    Ok(())
}

fn skip_to_close(cursor: &mut TokenCursor<'_>) -> Result<(), ParseError> {
    let mut depth = 1usize;
    loop {
        match cursor.kind() {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => depth -= 1,
            TokenKind::Eof => return Err(cursor.expected("')'")),
            _ => {}
        }
        cursor.advance()?;
        if depth == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{KeywordTable, MySqlKeywords, SqlServerKeywords};

    fn run(
        sql: &str,
        keywords: &dyn KeywordTable,
        parse: fn(&mut TokenCursor<'_>, &mut SqlStatement, bool) -> Result<(), ParseError>,
    ) -> SqlStatement {
        let mut cursor = TokenCursor::new(sql, keywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Select);
        parse(&mut cursor, &mut stmt, true).unwrap();
        assert!(cursor.is_eof(), "trailing input at {:?}", cursor.current());
        stmt
    }

    #[test]
    fn test_mysql_forms_normalize() {
        let comma = run("LIMIT 10, 20", &MySqlKeywords, parse_limit).limit.unwrap();
        let offset = run("LIMIT 20 OFFSET 10", &MySqlKeywords, parse_limit).limit.unwrap();
        assert_eq!(comma, offset);
        assert_eq!(comma.row_count, Some(LimitValue::Literal(20)));
        assert_eq!(comma.offset, Some(LimitValue::Literal(10)));
        assert!(comma.rewritable);
    }

    #[test]
    fn test_mysql_tokens_and_placeholders() {
        let stmt = run("LIMIT ?, 5", &MySqlKeywords, parse_limit);
        let limit = stmt.limit.unwrap();
        assert_eq!(limit.offset, Some(LimitValue::Placeholder(0)));
        assert_eq!(
            stmt.tokens,
            vec![RewriteToken::RowCount {
                span: Span::new(9, 10),
                value: 5
            }]
        );
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        let mut cursor = TokenCursor::new("LIMIT -1", &MySqlKeywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Select);
        let err = parse_limit(&mut cursor, &mut stmt, true).unwrap_err();
        assert!(err.message.starts_with("expected non-negative integer"));
    }

    #[test]
    fn test_offset_fetch() {
        let stmt = run(
            "OFFSET 10 ROWS FETCH NEXT 20 ROWS ONLY",
            &SqlServerKeywords,
            parse_offset_fetch,
        );
        let limit = stmt.limit.unwrap();
        assert_eq!(limit.row_count, Some(LimitValue::Literal(20)));
        assert_eq!(limit.offset, Some(LimitValue::Literal(10)));
        assert_eq!(stmt.tokens.len(), 2);

        let stmt = run("OFFSET ? ROW", &SqlServerKeywords, parse_offset_fetch);
        assert_eq!(stmt.limit.unwrap().row_count, None);
    }

    #[test]
    fn test_offset_without_rows_keyword() {
        let stmt = run(
            "OFFSET 10 FETCH NEXT 5 ROWS ONLY",
            &SqlServerKeywords,
            parse_offset_fetch,
        );
        let limit = stmt.limit.unwrap();
        assert_eq!(limit.offset, Some(LimitValue::Literal(10)));
        assert_eq!(limit.row_count, Some(LimitValue::Literal(5)));

        let stmt = run("OFFSET 10", &SqlServerKeywords, parse_offset_fetch);
        let limit = stmt.limit.unwrap();
        assert_eq!(limit.offset, Some(LimitValue::Literal(10)));
        assert_eq!(limit.row_count, None);
    }

    #[test]
    fn test_top_forms() {
        let stmt = run("TOP (5)", &SqlServerKeywords, parse_top);
        assert_eq!(stmt.limit.unwrap().row_count, Some(LimitValue::Literal(5)));

        let stmt = run("TOP 10 PERCENT WITH TIES", &SqlServerKeywords, parse_top);
        assert!(!stmt.limit.unwrap().rewritable);

        let stmt = run("TOP (? + 1)", &SqlServerKeywords, parse_top);
        assert!(stmt.limit.is_none());
    }

    #[test]
    fn test_limit_on_update_is_not_rewritable() {
        let mut cursor = TokenCursor::new("LIMIT 3", &MySqlKeywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Update);
        parse_limit(&mut cursor, &mut stmt, true).unwrap();
        assert!(!stmt.limit.unwrap().rewritable);
    }
}
