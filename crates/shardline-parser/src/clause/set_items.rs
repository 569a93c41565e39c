// `SET col = expr, ...` for UPDATE, INSERT ... SET, and ON DUPLICATE KEY UPDATE.

use crate::clause::expr::{identifier_chain, skip_expression, try_value};
use crate::cursor::TokenCursor;
use crate::error::ParseError;
use crate::model::{Condition, ConditionOperator, SqlStatement};
use crate::token::TokenKind;

fn is_item_end(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Comma
            | TokenKind::KwWhere
            | TokenKind::KwFrom
            | TokenKind::KwOrder
            | TokenKind::KwLimit
            | TokenKind::KwOutput
    )
}

/// Parse `SET` followed by assignments.
pub fn parse_set_items(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwSet)?;
    parse_assignments(cursor, stmt, false)
}

/// Parse `col = expr [, ...]`.
///
/// With `as_conditions`, assignments of a plain value become equality
/// conditions, as for `INSERT INTO t SET user_id = 1`.
pub fn parse_assignments(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    as_conditions: bool,
) -> Result<(), ParseError> {
    loop {
        let column = identifier_chain(cursor, stmt)?
            .ok_or_else(|| cursor.expected("column name"))?;
        cursor.expect(&TokenKind::Eq)?;
        if as_conditions {
            if let Some(value) = try_value(cursor)? {
                let ends = matches!(cursor.kind(), TokenKind::Eof | TokenKind::Semicolon)
                    || is_item_end(cursor.kind());
                if ends {
                    stmt.conditions.add(Condition {
                        column,
                        operator: ConditionOperator::Equal,
                        values: vec![value],
                    });
                }
            }
        }
        skip_expression(cursor, stmt, is_item_end)?;
        if !cursor.eat(&TokenKind::Comma)? {
            return Ok(());
        }
    }
}
