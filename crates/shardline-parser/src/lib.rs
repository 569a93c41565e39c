// Routing-oriented SQL parsing.
//
// An incremental, dialect-aware lexer feeds hand-written clause parsers
// that extract only what sharding needs: statement kind, logical tables,
// narrowing conditions, pagination, and the byte positions that the
// rewriter substitutes.

pub mod clause;
pub mod cursor;
pub mod dialect;
pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod token;

pub use cursor::{Identifier, TokenCursor};
pub use dialect::{keywords_for, KeywordTable};
pub use error::ParseError;
pub use lexer::Lexer;
pub use model::{
    Column, Condition, ConditionOperator, ConditionValue, Conditions, Limit, LimitValue,
    RewriteToken, SqlStatement, TableRef, Tables,
};
pub use parser::SqlParser;
pub use token::{QuoteStyle, Span, Token, TokenKind};

use shardline_types::DatabaseType;

/// Parse one statement in `database_type`'s dialect.
pub fn parse(sql: &str, database_type: DatabaseType) -> Result<SqlStatement, ParseError> {
    SqlParser::new(database_type).parse(sql)
}
