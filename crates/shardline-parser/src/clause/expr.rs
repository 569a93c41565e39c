//! Expression skipping and WHERE-condition extraction.
//!
//! Expressions are never built into a tree. They are walked token by token
//! so that placeholders are counted, `owner.column` qualifiers are recorded,
//! and nested `SELECT`s contribute their tables. Only simple predicates on a
//! column (`=`, `IN`, `BETWEEN`) are kept as routing conditions.

use shardline_types::ShardValue;

use crate::cursor::{Identifier, TokenCursor};
use crate::error::ParseError;
use crate::model::{Column, Condition, ConditionOperator, ConditionValue, SqlStatement};
use crate::parser::parse_nested_select;
use crate::token::TokenKind;

/// Tokens that end a clause of a statement at parenthesis depth 0.
pub fn is_clause_end(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwFrom
            | TokenKind::KwWhere
            | TokenKind::KwGroup
            | TokenKind::KwHaving
            | TokenKind::KwOrder
            | TokenKind::KwLimit
            | TokenKind::KwOffset
            | TokenKind::KwFetch
            | TokenKind::KwUnion
            | TokenKind::KwExcept
            | TokenKind::KwIntersect
            | TokenKind::KwFor
            | TokenKind::KwOn
            | TokenKind::KwUsing
            | TokenKind::KwSet
            | TokenKind::KwValues
            | TokenKind::KwOutput
    )
}

fn is_condition_end(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::KwAnd | TokenKind::KwOr) || is_clause_end(kind)
}

/// Whether the cursor sits on MySQL `LOCK IN SHARE MODE`.
pub fn at_lock_in_share_mode(cursor: &TokenCursor<'_>) -> Result<bool, ParseError> {
    if !matches!(cursor.kind(), TokenKind::Id(w) if w.eq_ignore_ascii_case("LOCK")) {
        return Ok(false);
    }
    Ok(matches!(cursor.peek_next()?, TokenKind::KwIn))
}

/// Whether the cursor sits on a join keyword rather than a function such
/// as `LEFT(name, 2)`.
pub fn at_join_keyword(cursor: &TokenCursor<'_>) -> Result<bool, ParseError> {
    match cursor.kind() {
        TokenKind::KwJoin
        | TokenKind::KwInner
        | TokenKind::KwCross
        | TokenKind::KwNatural
        | TokenKind::KwFull
        | TokenKind::KwStraightJoin => Ok(true),
        TokenKind::KwLeft | TokenKind::KwRight => {
            Ok(!matches!(cursor.peek_next()?, TokenKind::LeftParen))
        }
        _ => Ok(false),
    }
}

/// Walk one expression, stopping before a token for which `stop` holds, a
/// join keyword, `)`, `;`, or end of input at depth 0.
pub fn skip_expression(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    stop: fn(&TokenKind) -> bool,
) -> Result<(), ParseError> {
    loop {
        match cursor.kind() {
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::RightParen => return Ok(()),
            kind if stop(kind) => return Ok(()),
            _ if at_join_keyword(cursor)? || at_lock_in_share_mode(cursor)? => return Ok(()),
            TokenKind::LeftParen => skip_group(cursor, stmt)?,
            TokenKind::KwCase => skip_case(cursor, stmt)?,
            TokenKind::Id(_) | TokenKind::QuotedId(..) => {
                identifier_chain(cursor, stmt)?;
            }
            _ => {
                cursor.advance()?;
            }
        }
    }
}

/// Skip `( ... )`, parsing a nested `SELECT` if the group holds one.
pub fn skip_group(cursor: &mut TokenCursor<'_>, stmt: &mut SqlStatement) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::LeftParen)?;
    if cursor.check(&TokenKind::KwSelect) {
        parse_nested_select(cursor, stmt)?;
    } else {
        loop {
            skip_expression(cursor, stmt, |_| false)?;
            if !at_join_keyword(cursor)? {
                break;
            }
            cursor.advance()?;
        }
    }
    cursor.expect(&TokenKind::RightParen)?;
    Ok(())
}

fn skip_case(cursor: &mut TokenCursor<'_>, stmt: &mut SqlStatement) -> Result<(), ParseError> {
    let open = cursor.advance()?;
    loop {
        skip_expression(cursor, stmt, |k| matches!(k, TokenKind::KwEnd))?;
        match cursor.kind() {
            TokenKind::KwEnd => {
                cursor.advance()?;
                return Ok(());
            }
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::RightParen => {
                return Err(ParseError::at("CASE without END", &open));
            }
            // FROM, ON, ... inside CASE are not clause boundaries.
            _ => {
                cursor.advance()?;
            }
        }
    }
}

/// Consume `a`, `a.b`, or `a.b.c`, recording the qualifier (second to last
/// part) and returning the column it names.
pub fn identifier_chain(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<Option<Column>, ParseError> {
    let mut parts: Vec<Identifier> = vec![cursor.expect_identifier()?];
    while cursor.check(&TokenKind::Dot) {
        cursor.advance()?;
        match cursor.kind() {
            TokenKind::Id(_) | TokenKind::QuotedId(..) => parts.push(cursor.expect_identifier()?),
            TokenKind::Star => {
                cursor.advance()?;
                if let Some(owner) = parts.last() {
                    stmt.add_qualifier(owner.clone());
                }
                return Ok(None);
            }
            _ => return Err(cursor.expected("identifier")),
        }
    }
    let Some(last) = parts.pop() else {
        return Ok(None);
    };
    let owner = parts.pop();
    if let Some(owner) = &owner {
        stmt.add_qualifier(owner.clone());
    }
    Ok(Some(Column {
        table: owner.map(|o| o.name),
        name: last.name,
    }))
}

/// Consume a sharding-usable value: number, string, or `?`.
///
/// Returns `None` without consuming when the current token is not a value.
/// A leading `-` is consumed even if no number follows.
pub fn try_value(cursor: &mut TokenCursor<'_>) -> Result<Option<ConditionValue>, ParseError> {
    let value = match cursor.kind() {
        TokenKind::Integer(i) => ConditionValue::Literal(ShardValue::Integer(*i)),
        TokenKind::Float(f) => ConditionValue::Literal(ShardValue::Float(*f)),
        TokenKind::String(s) => ConditionValue::Literal(ShardValue::Text(s.clone())),
        TokenKind::Question => ConditionValue::Placeholder(cursor.parameter_index()),
        TokenKind::Minus => {
            cursor.advance()?;
            let negated = match cursor.kind() {
                TokenKind::Integer(i) => ShardValue::Integer(i.wrapping_neg()),
                TokenKind::Float(f) => ShardValue::Float(-*f),
                _ => return Ok(None),
            };
            cursor.advance()?;
            return Ok(Some(ConditionValue::Literal(negated)));
        }
        _ => return Ok(None),
    };
    cursor.advance()?;
    Ok(Some(value))
}

fn at_predicate_end(cursor: &TokenCursor<'_>) -> Result<bool, ParseError> {
    Ok(matches!(
        cursor.kind(),
        TokenKind::Eof | TokenKind::Semicolon | TokenKind::RightParen
    ) || is_condition_end(cursor.kind())
        || at_join_keyword(cursor)?
        || at_lock_in_share_mode(cursor)?)
}

/// Parse `WHERE <conditions>` if present.
pub fn parse_where(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    if cursor.eat(&TokenKind::KwWhere)? {
        parse_conditions(cursor, stmt)?;
    }
    Ok(())
}

/// Parse a chain of predicates joined by `AND` / `OR`.
pub fn parse_conditions(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    loop {
        parse_predicate(cursor, stmt)?;
        if cursor.eat(&TokenKind::KwAnd)? {
            continue;
        }
        if cursor.eat(&TokenKind::KwOr)? {
            stmt.conditions.mark_unusable();
            continue;
        }
        return Ok(());
    }
}

fn parse_predicate(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    if cursor.check(&TokenKind::KwNot) {
        // Negated predicates never narrow routing.
        let before = stmt.conditions.clone();
        cursor.advance()?;
        parse_predicate(cursor, stmt)?;
        stmt.conditions = before;
        return Ok(());
    }

    if cursor.check(&TokenKind::LeftParen) {
        if matches!(cursor.peek_next()?, TokenKind::KwSelect) {
            skip_group(cursor, stmt)?;
        } else {
            cursor.advance()?;
            parse_conditions(cursor, stmt)?;
            cursor.expect(&TokenKind::RightParen)?;
        }
        return skip_expression(cursor, stmt, is_condition_end);
    }

    if !cursor.kind().is_identifier() {
        return skip_expression(cursor, stmt, is_condition_end);
    }

    let Some(column) = identifier_chain(cursor, stmt)? else {
        return skip_expression(cursor, stmt, is_condition_end);
    };

    let condition = match cursor.kind() {
        TokenKind::Eq | TokenKind::EqEq => {
            cursor.advance()?;
            single_value(cursor, column)?
        }
        TokenKind::KwIn => {
            cursor.advance()?;
            in_list(cursor, stmt, column)?
        }
        TokenKind::KwBetween => {
            cursor.advance()?;
            between(cursor, column)?
        }
        _ => None,
    };

    match condition {
        Some(condition) if at_predicate_end(cursor)? => stmt.conditions.add(condition),
        _ => {}
    }
    skip_expression(cursor, stmt, is_condition_end)
}

fn single_value(
    cursor: &mut TokenCursor<'_>,
    column: Column,
) -> Result<Option<Condition>, ParseError> {
    Ok(try_value(cursor)?.map(|value| Condition {
        column,
        operator: ConditionOperator::Equal,
        values: vec![value],
    }))
}

fn in_list(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    column: Column,
) -> Result<Option<Condition>, ParseError> {
    if !cursor.check(&TokenKind::LeftParen) {
        return Ok(None);
    }
    if matches!(cursor.peek_next()?, TokenKind::KwSelect) {
        skip_group(cursor, stmt)?;
        return Ok(None);
    }
    cursor.advance()?;
    let mut values = Vec::new();
    let mut usable = true;
    loop {
        match try_value(cursor)? {
            Some(v) if cursor.check_any(&[TokenKind::Comma, TokenKind::RightParen]) => {
                values.push(v);
            }
            _ => {
                usable = false;
                skip_expression(cursor, stmt, |k| matches!(k, TokenKind::Comma))?;
            }
        }
        if !cursor.eat(&TokenKind::Comma)? {
            break;
        }
    }
    cursor.expect(&TokenKind::RightParen)?;
    Ok(usable.then_some(Condition {
        column,
        operator: ConditionOperator::In,
        values,
    }))
}

fn between(cursor: &mut TokenCursor<'_>, column: Column) -> Result<Option<Condition>, ParseError> {
    let Some(lower) = try_value(cursor)? else {
        return Ok(None);
    };
    if !cursor.eat(&TokenKind::KwAnd)? {
        return Ok(None);
    }
    let Some(upper) = try_value(cursor)? else {
        return Ok(None);
    };
    Ok(Some(Condition {
        column,
        operator: ConditionOperator::Between,
        values: vec![lower, upper],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MySqlKeywords;
    use shardline_types::SqlKind;

    fn where_conditions(sql: &str) -> (SqlStatement, usize) {
        let mut cursor = TokenCursor::new(sql, &MySqlKeywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Select);
        parse_where(&mut cursor, &mut stmt).unwrap();
        assert!(cursor.is_eof(), "unconsumed input at {:?}", cursor.current());
        let params = cursor.parameter_index();
        (stmt, params)
    }

    #[test]
    fn test_equality_and_placeholder_index() {
        let (stmt, params) = where_conditions("WHERE status = ? AND user_id = ?");
        assert_eq!(params, 2);
        let cond = stmt.conditions.find("orders", "user_id").unwrap();
        assert_eq!(cond.operator, ConditionOperator::Equal);
        assert_eq!(cond.values, vec![ConditionValue::Placeholder(1)]);
    }

    #[test]
    fn test_in_and_between() {
        let (stmt, _) =
            where_conditions("WHERE o.user_id IN (1, 2, ?) AND order_id BETWEEN 10 AND -5");
        let cond = stmt.conditions.find("o", "user_id").unwrap();
        assert_eq!(cond.operator, ConditionOperator::In);
        assert_eq!(cond.values.len(), 3);
        let cond = stmt.conditions.find("any", "order_id").unwrap();
        assert_eq!(
            cond.values,
            vec![
                ConditionValue::Literal(ShardValue::Integer(10)),
                ConditionValue::Literal(ShardValue::Integer(-5)),
            ]
        );
    }

    #[test]
    fn test_or_disables_narrowing() {
        let (stmt, _) = where_conditions("WHERE user_id = 1 OR user_id = 2");
        assert!(!stmt.conditions.is_usable());
        assert!(stmt.conditions.is_empty());
    }

    #[test]
    fn test_complex_values_are_not_conditions() {
        let (stmt, params) =
            where_conditions("WHERE user_id = ? + 1 AND name LIKE 'a%' AND LEFT(code, 2) = 'ab'");
        assert!(stmt.conditions.is_empty());
        assert_eq!(params, 1);
    }

    #[test]
    fn test_nested_parentheses_and_case() {
        let (stmt, params) = where_conditions(
            "WHERE (user_id = ? AND (flag = CASE WHEN a = 1 AND b = 2 THEN 1 ELSE 0 END)) AND ? > 0",
        );
        assert_eq!(params, 2);
        assert!(stmt.conditions.find("t", "user_id").is_some());
        assert!(stmt.conditions.find("t", "flag").is_none());
    }

    #[test]
    fn test_not_predicate_is_ignored() {
        let (stmt, _) = where_conditions("WHERE NOT user_id = 3 AND order_id = 4");
        assert!(stmt.conditions.find("t", "user_id").is_none());
        assert!(stmt.conditions.find("t", "order_id").is_some());
    }

    #[test]
    fn test_not_in_is_ignored() {
        let (stmt, _) = where_conditions("WHERE user_id NOT IN (1, 2)");
        assert!(stmt.conditions.is_empty());
    }

    #[test]
    fn test_qualifiers_are_recorded() {
        let mut cursor =
            TokenCursor::new("t_order.user_id = 1 AND x.* IS NULL", &MySqlKeywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Select);
        parse_conditions(&mut cursor, &mut stmt).unwrap();
        let owners: Vec<&str> = stmt.qualifiers.iter().map(|q| q.owner.name.as_str()).collect();
        assert_eq!(owners, vec!["t_order", "x"]);
    }

    #[test]
    fn test_unbalanced_group_is_error() {
        let mut cursor = TokenCursor::new("WHERE (a = 1", &MySqlKeywords).unwrap();
        let mut stmt = SqlStatement::new(SqlKind::Select);
        let err = parse_where(&mut cursor, &mut stmt).unwrap_err();
        assert!(err.message.starts_with("expected ')'"), "{}", err.message);
    }
}
