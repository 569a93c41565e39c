// Statement parsers.
//
// One pass over the token stream per statement. Only the parts of SQL that
// influence routing and rewriting are interpreted; everything else is
// walked so that placeholders are still counted.

use shardline_types::{DatabaseType, SqlKind};

use crate::clause::ddl::{parse_alter_table, parse_create_table, parse_drop_table, parse_truncate};
use crate::clause::expr::{
    at_lock_in_share_mode, identifier_chain, is_clause_end, parse_where, skip_expression, try_value,
};
use crate::clause::limit::{parse_limit, parse_offset_fetch, parse_top};
use crate::clause::set_items::{parse_assignments, parse_set_items};
use crate::clause::table::{parse_table_name, parse_table_references, qualified_name};
use crate::cursor::TokenCursor;
use crate::dialect::keywords_for;
use crate::error::ParseError;
use crate::model::{Condition, ConditionOperator, ConditionValue, RewriteToken, SqlStatement};
use crate::token::TokenKind;

/// Parser for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlParser {
    database_type: DatabaseType,
}

impl SqlParser {
    #[must_use]
    pub const fn new(database_type: DatabaseType) -> Self {
        Self { database_type }
    }

    #[must_use]
    pub const fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Parse a single statement, optionally terminated by `;`.
    pub fn parse(&self, sql: &str) -> Result<SqlStatement, ParseError> {
        let mut cursor = TokenCursor::new(sql, keywords_for(self.database_type))?;
        let mut stmt = parse_statement(&mut cursor)?;
        cursor.eat(&TokenKind::Semicolon)?;
        if !cursor.is_eof() {
            return Err(cursor.expected("end of statement"));
        }
        stmt.finish(cursor.parameter_index());
        tracing::debug!(
            target: "shardline.parse",
            dialect = ?self.database_type,
            kind = %stmt.kind,
            tables = stmt.tables.len(),
            conditions = stmt.conditions.len(),
            parameters = stmt.parameter_index,
            "parsed statement"
        );
        Ok(stmt)
    }
}

fn parse_statement(cursor: &mut TokenCursor<'_>) -> Result<SqlStatement, ParseError> {
    let kind = match cursor.kind() {
        TokenKind::KwSelect | TokenKind::LeftParen => SqlKind::Select,
        TokenKind::KwInsert | TokenKind::KwReplace => SqlKind::Insert,
        TokenKind::KwUpdate => SqlKind::Update,
        TokenKind::KwDelete => SqlKind::Delete,
        TokenKind::KwCreate | TokenKind::KwDrop | TokenKind::KwTruncate | TokenKind::KwAlter => {
            SqlKind::Ddl
        }
        _ => return Err(cursor.expected("statement")),
    };
    let mut stmt = SqlStatement::new(kind);
    match cursor.kind() {
        TokenKind::KwSelect | TokenKind::LeftParen => parse_select(cursor, &mut stmt, true)?,
        TokenKind::KwInsert | TokenKind::KwReplace => parse_insert(cursor, &mut stmt)?,
        TokenKind::KwUpdate => parse_update(cursor, &mut stmt)?,
        TokenKind::KwDelete => parse_delete(cursor, &mut stmt)?,
        TokenKind::KwCreate => parse_create_table(cursor, &mut stmt)?,
        TokenKind::KwDrop => parse_drop_table(cursor, &mut stmt)?,
        TokenKind::KwTruncate => parse_truncate(cursor, &mut stmt)?,
        _ => parse_alter_table(cursor, &mut stmt)?,
    }
    Ok(stmt)
}

/// Parse a `SELECT` nested in another statement. Its tables and conditions
/// are merged into `stmt`; its pagination is not recorded.
pub(crate) fn parse_nested_select(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    parse_select(cursor, stmt, false)
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

const SELECT_MODIFIERS: &[TokenKind] = &[
    TokenKind::KwAll,
    TokenKind::KwDistinct,
    TokenKind::KwHighPriority,
    TokenKind::KwStraightJoin,
];

fn parse_select(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    if cursor.eat(&TokenKind::LeftParen)? {
        parse_select(cursor, stmt, record_limit)?;
        cursor.expect(&TokenKind::RightParen)?;
    } else {
        parse_select_core(cursor, stmt, record_limit)?;
    }

    if cursor.eat_any(&[TokenKind::KwUnion, TokenKind::KwExcept, TokenKind::KwIntersect])? {
        cursor.eat_any(&[TokenKind::KwAll, TokenKind::KwDistinct])?;
        return parse_select(cursor, stmt, false);
    }

    if cursor.eat(&TokenKind::KwOrder)? {
        cursor.expect(&TokenKind::KwBy)?;
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    parse_pagination(cursor, stmt, record_limit)?;
    skip_locking(cursor)
}

fn parse_select_core(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwSelect)?;
    cursor.skip_all(SELECT_MODIFIERS)?;
    if cursor.check(&TokenKind::KwTop) {
        parse_top(cursor, stmt, record_limit)?;
    }
    skip_expression(cursor, stmt, is_clause_end)?;
    if cursor.eat(&TokenKind::KwFrom)? {
        parse_table_references(cursor, stmt)?;
    }
    parse_where(cursor, stmt)?;
    if cursor.eat(&TokenKind::KwGroup)? {
        cursor.expect(&TokenKind::KwBy)?;
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    if cursor.eat(&TokenKind::KwHaving)? {
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    Ok(())
}

fn parse_pagination(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    record_limit: bool,
) -> Result<(), ParseError> {
    match cursor.kind() {
        TokenKind::KwLimit => parse_limit(cursor, stmt, record_limit),
        TokenKind::KwOffset | TokenKind::KwFetch
            if cursor.database_type() != DatabaseType::MySql =>
        {
            parse_offset_fetch(cursor, stmt, record_limit)
        }
        _ => Ok(()),
    }
}

/// `FOR UPDATE [OF ..] [NOWAIT]`, `FOR SHARE`, `LOCK IN SHARE MODE`.
fn skip_locking(cursor: &mut TokenCursor<'_>) -> Result<(), ParseError> {
    let locking = cursor.check(&TokenKind::KwFor) || at_lock_in_share_mode(cursor)?;
    if locking {
        while !cursor.check_any(&[TokenKind::Eof, TokenKind::Semicolon, TokenKind::RightParen]) {
            cursor.advance()?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

const INSERT_MODIFIERS: &[TokenKind] = &[
    TokenKind::KwLowPriority,
    TokenKind::KwDelayed,
    TokenKind::KwHighPriority,
    TokenKind::KwIgnore,
];

fn is_output_end(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwValues | TokenKind::KwSelect | TokenKind::KwDefault
    )
}

fn parse_insert(cursor: &mut TokenCursor<'_>, stmt: &mut SqlStatement) -> Result<(), ParseError> {
    cursor.expect_any(&[TokenKind::KwInsert, TokenKind::KwReplace], "INSERT")?;
    cursor.skip_all(INSERT_MODIFIERS)?;
    cursor.eat(&TokenKind::KwInto)?;
    parse_table_name(cursor, stmt)?;

    let mut columns_end = None;
    if cursor.check(&TokenKind::LeftParen) && !matches!(cursor.peek_next()?, TokenKind::KwSelect) {
        cursor.advance()?;
        loop {
            let column = identifier_chain(cursor, stmt)?
                .ok_or_else(|| cursor.expected("column name"))?;
            stmt.insert_columns.push(column.name);
            if !cursor.eat(&TokenKind::Comma)? {
                break;
            }
        }
        columns_end = Some(cursor.current().span.start);
        cursor.expect(&TokenKind::RightParen)?;
    }

    if cursor.eat(&TokenKind::KwOutput)? {
        skip_expression(cursor, stmt, is_output_end)?;
    }

    match cursor.kind() {
        TokenKind::KwValues | TokenKind::KwValue => {
            cursor.advance()?;
            parse_values_rows(cursor, stmt, columns_end)?;
        }
        TokenKind::KwSet => {
            cursor.advance()?;
            parse_assignments(cursor, stmt, true)?;
            stmt.insert_rows = 1;
        }
        TokenKind::KwDefault => {
            cursor.advance()?;
            cursor.expect(&TokenKind::KwValues)?;
            stmt.insert_rows = 1;
        }
        TokenKind::KwSelect | TokenKind::LeftParen => parse_nested_select(cursor, stmt)?,
        _ => return Err(cursor.expected("VALUES, SET or SELECT")),
    }

    if cursor.eat(&TokenKind::KwOn)? {
        cursor.expect(&TokenKind::KwDuplicate)?;
        cursor.expect(&TokenKind::KwKey)?;
        cursor.expect(&TokenKind::KwUpdate)?;
        parse_assignments(cursor, stmt, false)?;
    }
    Ok(())
}

fn parse_values_rows(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
    columns_end: Option<usize>,
) -> Result<(), ParseError> {
    let mut first_row: Vec<Option<ConditionValue>> = Vec::new();
    let mut first_row_end = None;
    loop {
        cursor.expect(&TokenKind::LeftParen)?;
        let mut row = Vec::new();
        loop {
            let value = try_value(cursor)?;
            if value.is_some()
                && cursor.check_any(&[TokenKind::Comma, TokenKind::RightParen])
            {
                row.push(value);
            } else {
                row.push(None);
                skip_expression(cursor, stmt, |k| matches!(k, TokenKind::Comma))?;
            }
            if !cursor.eat(&TokenKind::Comma)? {
                break;
            }
        }
        let values_end = cursor.current().span.start;
        let parameter_index = cursor.parameter_index();
        cursor.expect(&TokenKind::RightParen)?;
        if stmt.insert_rows == 0 {
            first_row = row;
            first_row_end = Some((values_end, parameter_index));
        }
        stmt.insert_rows += 1;
        if !cursor.eat(&TokenKind::Comma)? {
            break;
        }
    }

    if stmt.insert_rows != 1 {
        return Ok(());
    }
    for (name, value) in stmt.insert_columns.clone().into_iter().zip(first_row) {
        if let Some(value) = value {
            stmt.conditions.add(Condition {
                column: crate::model::Column::new(None, &name),
                operator: ConditionOperator::Equal,
                values: vec![value],
            });
        }
    }
    if let (Some(columns_end), Some((values_end, parameter_index))) = (columns_end, first_row_end) {
        stmt.tokens.push(RewriteToken::GeneratedKey {
            columns_end,
            values_end,
            parameter_index,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// UPDATE / DELETE
// ---------------------------------------------------------------------------

fn parse_order_and_limit(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    if cursor.eat(&TokenKind::KwOrder)? {
        cursor.expect(&TokenKind::KwBy)?;
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    if cursor.check(&TokenKind::KwLimit) {
        parse_limit(cursor, stmt, true)?;
    }
    Ok(())
}

fn parse_update(cursor: &mut TokenCursor<'_>, stmt: &mut SqlStatement) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwUpdate)?;
    cursor.skip_all(&[TokenKind::KwLowPriority, TokenKind::KwIgnore])?;
    if cursor.check(&TokenKind::KwTop) {
        parse_top(cursor, stmt, false)?;
    }
    parse_table_references(cursor, stmt)?;
    parse_set_items(cursor, stmt)?;
    if cursor.eat(&TokenKind::KwOutput)? {
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    if cursor.eat(&TokenKind::KwFrom)? {
        parse_table_references(cursor, stmt)?;
    }
    parse_where(cursor, stmt)?;
    parse_order_and_limit(cursor, stmt)
}

fn parse_delete(cursor: &mut TokenCursor<'_>, stmt: &mut SqlStatement) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwDelete)?;
    cursor.skip_all(&[TokenKind::KwLowPriority, TokenKind::KwQuick, TokenKind::KwIgnore])?;
    if cursor.check(&TokenKind::KwTop) {
        parse_top(cursor, stmt, false)?;
    }
    if cursor.eat(&TokenKind::KwFrom)? {
        parse_table_references(cursor, stmt)?;
    } else {
        // `DELETE t1, t2 FROM ...` or SQL Server `DELETE orders WHERE ...`.
        let mut targets = vec![qualified_name(cursor)?];
        while cursor.eat(&TokenKind::Comma)? {
            targets.push(qualified_name(cursor)?);
        }
        if cursor.eat(&TokenKind::KwFrom)? {
            parse_table_references(cursor, stmt)?;
        }
        for target in targets {
            if stmt.tables.resolve_owner(&target.name).is_none()
                || stmt.tables.contains_name(&target.name)
            {
                stmt.add_table(&target, None);
            }
        }
    }
    if cursor.eat(&TokenKind::KwOutput)? {
        skip_expression(cursor, stmt, is_clause_end)?;
    }
    if cursor.eat(&TokenKind::KwUsing)? {
        parse_table_references(cursor, stmt)?;
    }
    parse_where(cursor, stmt)?;
    parse_order_and_limit(cursor, stmt)
}
