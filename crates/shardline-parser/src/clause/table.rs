// Table references: FROM lists, joins, UPDATE/DELETE targets.

use crate::clause::expr::{
    at_join_keyword, at_lock_in_share_mode, is_clause_end, skip_expression, skip_group,
};
use crate::cursor::{Identifier, TokenCursor};
use crate::error::ParseError;
use crate::model::SqlStatement;
use crate::token::TokenKind;

const JOIN_WORDS: &[TokenKind] = &[
    TokenKind::KwNatural,
    TokenKind::KwInner,
    TokenKind::KwCross,
    TokenKind::KwLeft,
    TokenKind::KwRight,
    TokenKind::KwFull,
    TokenKind::KwOuter,
    TokenKind::KwStraightJoin,
    TokenKind::KwJoin,
];

fn is_on_end(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Comma) || is_clause_end(kind)
}

/// Parse `name` or `schema.name`, recording the table without an alias.
pub fn parse_table_name(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<Identifier, ParseError> {
    let ident = qualified_name(cursor)?;
    stmt.add_table(&ident, None);
    Ok(ident)
}

pub(crate) fn qualified_name(cursor: &mut TokenCursor<'_>) -> Result<Identifier, ParseError> {
    let mut ident = cursor.expect_identifier()?;
    if cursor.eat(&TokenKind::Dot)? {
        ident = cursor.expect_identifier()?;
    }
    Ok(ident)
}

fn parse_alias(cursor: &mut TokenCursor<'_>) -> Result<Option<String>, ParseError> {
    if cursor.eat(&TokenKind::KwAs)? {
        return Ok(Some(cursor.expect_identifier()?.name));
    }
    if cursor.kind().is_identifier() && !at_lock_in_share_mode(cursor)? {
        return Ok(Some(cursor.expect_identifier()?.name));
    }
    Ok(None)
}

/// MySQL `USE|IGNORE|FORCE INDEX|KEY [FOR ...] (...)` and SQL Server
/// `WITH (NOLOCK)`.
fn skip_table_hints(cursor: &mut TokenCursor<'_>) -> Result<(), ParseError> {
    loop {
        if cursor.check_any(&[TokenKind::KwUse, TokenKind::KwIgnore, TokenKind::KwForce]) {
            cursor.advance()?;
            cursor.expect_any(&[TokenKind::KwIndex, TokenKind::KwKey], "INDEX or KEY")?;
            while !cursor.check(&TokenKind::LeftParen) {
                if cursor.is_eof() {
                    return Err(cursor.expected("index list"));
                }
                cursor.advance()?;
            }
            cursor.skip_parentheses()?;
        } else if cursor.check(&TokenKind::KwWith)
            && matches!(cursor.peek_next()?, TokenKind::LeftParen)
        {
            cursor.advance()?;
            cursor.skip_parentheses()?;
        } else {
            return Ok(());
        }
    }
}

/// One table factor: a table with optional alias, a derived table, or a
/// parenthesized join.
pub fn parse_table_factor(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    if cursor.check(&TokenKind::LeftParen) {
        if matches!(cursor.peek_next()?, TokenKind::KwSelect) {
            skip_group(cursor, stmt)?;
            parse_alias(cursor)?;
        } else {
            cursor.advance()?;
            parse_table_references(cursor, stmt)?;
            cursor.expect(&TokenKind::RightParen)?;
        }
        return Ok(());
    }
    let ident = qualified_name(cursor)?;
    let alias = parse_alias(cursor)?;
    stmt.add_table(&ident, alias);
    skip_table_hints(cursor)
}

/// A comma- and join-separated list of table factors.
pub fn parse_table_references(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    parse_table_factor(cursor, stmt)?;
    loop {
        if cursor.eat(&TokenKind::Comma)? {
            parse_table_factor(cursor, stmt)?;
        } else if at_join_keyword(cursor)? {
            cursor.skip_all(JOIN_WORDS)?;
            parse_table_factor(cursor, stmt)?;
            if cursor.eat(&TokenKind::KwOn)? {
                skip_expression(cursor, stmt, is_on_end)?;
            } else if cursor.eat(&TokenKind::KwUsing)? {
                cursor.skip_parentheses()?;
            }
        } else {
            return Ok(());
        }
    }
}
