// DDL: CREATE TABLE, DROP TABLE, TRUNCATE TABLE, ALTER TABLE.
//
// Only the table names matter for routing; everything after them is
// consumed without interpretation. CREATE TABLE differs per dialect in the
// words allowed around `TABLE`, supplied by `CreateTableHooks`.

use shardline_types::DatabaseType;

use crate::clause::table::parse_table_name;
use crate::cursor::TokenCursor;
use crate::error::ParseError;
use crate::model::SqlStatement;
use crate::token::TokenKind;

/// Dialect-specific words around `TABLE` in `CREATE ... TABLE ... name`.
pub trait CreateTableHooks: Sync {
    /// Words allowed between `CREATE` and `TABLE`.
    fn keywords_before_table(&self) -> &'static [TokenKind];
    /// Words allowed between `TABLE` and the table name.
    fn keywords_before_name(&self) -> &'static [TokenKind];
}

struct MySqlCreateTable;

impl CreateTableHooks for MySqlCreateTable {
    fn keywords_before_table(&self) -> &'static [TokenKind] {
        &[TokenKind::KwTemporary]
    }

    fn keywords_before_name(&self) -> &'static [TokenKind] {
        &[TokenKind::KwIf, TokenKind::KwNot, TokenKind::KwExists]
    }
}

struct SqlServerCreateTable;

impl CreateTableHooks for SqlServerCreateTable {
    fn keywords_before_table(&self) -> &'static [TokenKind] {
        &[]
    }

    fn keywords_before_name(&self) -> &'static [TokenKind] {
        &[]
    }
}

struct GenericCreateTable;

impl CreateTableHooks for GenericCreateTable {
    fn keywords_before_table(&self) -> &'static [TokenKind] {
        &[
            TokenKind::KwGlobal,
            TokenKind::KwLocal,
            TokenKind::KwTemporary,
            TokenKind::KwTemp,
        ]
    }

    fn keywords_before_name(&self) -> &'static [TokenKind] {
        &[TokenKind::KwIf, TokenKind::KwNot, TokenKind::KwExists]
    }
}

#[must_use]
pub fn hooks_for(database_type: DatabaseType) -> &'static dyn CreateTableHooks {
    match database_type {
        DatabaseType::MySql => &MySqlCreateTable,
        DatabaseType::SqlServer => &SqlServerCreateTable,
        DatabaseType::Generic => &GenericCreateTable,
    }
}

fn skip_rest(cursor: &mut TokenCursor<'_>) -> Result<(), ParseError> {
    while !cursor.is_eof() && !cursor.check(&TokenKind::Semicolon) {
        cursor.advance()?;
    }
    Ok(())
}

/// `CREATE <before_table> TABLE <before_name> name ...`
pub fn parse_create_table(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    let hooks = hooks_for(cursor.database_type());
    cursor.expect(&TokenKind::KwCreate)?;
    cursor.skip_all(hooks.keywords_before_table())?;
    cursor.expect(&TokenKind::KwTable)?;
    cursor.skip_all(hooks.keywords_before_name())?;
    parse_table_name(cursor, stmt)?;
    skip_rest(cursor)
}

/// `DROP [TEMPORARY] TABLE [IF EXISTS] a [, b ...] [CASCADE|RESTRICT]`
pub fn parse_drop_table(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwDrop)?;
    cursor.eat(&TokenKind::KwTemporary)?;
    cursor.expect(&TokenKind::KwTable)?;
    if cursor.eat(&TokenKind::KwIf)? {
        cursor.expect(&TokenKind::KwExists)?;
    }
    parse_table_name(cursor, stmt)?;
    while cursor.eat(&TokenKind::Comma)? {
        parse_table_name(cursor, stmt)?;
    }
    skip_rest(cursor)
}

/// `TRUNCATE [TABLE] name`
pub fn parse_truncate(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwTruncate)?;
    cursor.eat(&TokenKind::KwTable)?;
    parse_table_name(cursor, stmt)?;
    skip_rest(cursor)
}

/// `ALTER TABLE name ...`, including `REFERENCES other` in added
/// constraints.
pub fn parse_alter_table(
    cursor: &mut TokenCursor<'_>,
    stmt: &mut SqlStatement,
) -> Result<(), ParseError> {
    cursor.expect(&TokenKind::KwAlter)?;
    cursor.expect(&TokenKind::KwTable)?;
    parse_table_name(cursor, stmt)?;
    while !cursor.is_eof() && !cursor.check(&TokenKind::Semicolon) {
        if cursor.eat(&TokenKind::KwReferences)? {
            parse_table_name(cursor, stmt)?;
        } else {
            cursor.advance()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::keywords_for;
    use shardline_types::SqlKind;

    fn ddl(
        sql: &str,
        db: DatabaseType,
        parse: fn(&mut TokenCursor<'_>, &mut SqlStatement) -> Result<(), ParseError>,
    ) -> Result<SqlStatement, ParseError> {
        let mut cursor = TokenCursor::new(sql, keywords_for(db))?;
        let mut stmt = SqlStatement::new(SqlKind::Ddl);
        parse(&mut cursor, &mut stmt)?;
        Ok(stmt)
    }

    #[test]
    fn test_create_table_hooks_per_dialect() {
        let sql = "CREATE TEMPORARY TABLE IF NOT EXISTS orders (id INT PRIMARY KEY)";
        let stmt = ddl(sql, DatabaseType::MySql, parse_create_table).unwrap();
        assert_eq!(stmt.tables.single_name(), Some("orders"));

        let err = ddl(sql, DatabaseType::SqlServer, parse_create_table).unwrap_err();
        assert!(err.is_expectation_of(&TokenKind::KwTable), "{}", err.message);

        let stmt = ddl(
            "CREATE GLOBAL TEMPORARY TABLE orders (id INT)",
            DatabaseType::Generic,
            parse_create_table,
        )
        .unwrap();
        assert_eq!(stmt.tables.single_name(), Some("orders"));
    }

    #[test]
    fn test_drop_multiple_tables() {
        let stmt = ddl(
            "DROP TABLE IF EXISTS orders, items CASCADE",
            DatabaseType::MySql,
            parse_drop_table,
        )
        .unwrap();
        let names: Vec<&str> = stmt.tables.names().collect();
        assert_eq!(names, vec!["orders", "items"]);
    }

    #[test]
    fn test_truncate_and_alter() {
        let stmt = ddl("TRUNCATE orders", DatabaseType::Generic, parse_truncate).unwrap();
        assert_eq!(stmt.tables.single_name(), Some("orders"));

        let stmt = ddl(
            "ALTER TABLE items ADD CONSTRAINT fk FOREIGN KEY (oid) REFERENCES orders (id)",
            DatabaseType::MySql,
            parse_alter_table,
        )
        .unwrap();
        assert_eq!(stmt.tables.len(), 2);
    }
}
