// Dialect keyword tables.
//
// Dialects differ in which words are reserved and in a handful of lexical
// rules. Both are supplied to the lexer as a lookup table rather than by
// branching inside it.

use shardline_types::DatabaseType;

use crate::token::TokenKind;

/// Per-dialect keyword lookup and lexical switches.
pub trait KeywordTable: Send + Sync {
    /// The dialect this table describes.
    fn database_type(&self) -> DatabaseType;

    /// Dialect-only keywords. `upper` is ASCII-uppercased.
    fn lookup_dialect_keyword(&self, upper: &str) -> Option<TokenKind>;

    /// `#` starts a line comment.
    fn hash_comments(&self) -> bool {
        false
    }

    /// Backslash escapes inside string literals.
    fn backslash_escapes(&self) -> bool {
        false
    }

    /// `"..."` is a string literal rather than a delimited identifier.
    fn double_quoted_strings(&self) -> bool {
        false
    }

    /// Resolve `word` to a keyword, consulting the dialect table first.
    fn lookup(&self, word: &str) -> Option<TokenKind> {
        let upper = word.to_ascii_uppercase();
        self.lookup_dialect_keyword(&upper)
            .or_else(|| TokenKind::lookup_common_keyword(&upper))
    }
}

/// MySQL: `LIMIT`, statement modifiers, index hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlKeywords;

impl KeywordTable for MySqlKeywords {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn lookup_dialect_keyword(&self, upper: &str) -> Option<TokenKind> {
        let kw = match upper {
            "DELAYED" => TokenKind::KwDelayed,
            "DUPLICATE" => TokenKind::KwDuplicate,
            "FORCE" => TokenKind::KwForce,
            "HIGH_PRIORITY" => TokenKind::KwHighPriority,
            "IGNORE" => TokenKind::KwIgnore,
            "LIMIT" => TokenKind::KwLimit,
            "LOW_PRIORITY" => TokenKind::KwLowPriority,
            "QUICK" => TokenKind::KwQuick,
            "REPLACE" => TokenKind::KwReplace,
            "STRAIGHT_JOIN" => TokenKind::KwStraightJoin,
            "USE" => TokenKind::KwUse,
            "VALUE" => TokenKind::KwValue,
            _ => return None,
        };
        Some(kw)
    }

    fn hash_comments(&self) -> bool {
        true
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn double_quoted_strings(&self) -> bool {
        true
    }
}

/// SQL Server: `TOP`, `OFFSET .. FETCH`, `OUTPUT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerKeywords;

impl KeywordTable for SqlServerKeywords {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn lookup_dialect_keyword(&self, upper: &str) -> Option<TokenKind> {
        sqlserver_keyword(upper)
    }
}

fn sqlserver_keyword(upper: &str) -> Option<TokenKind> {
    let kw = match upper {
        "FETCH" => TokenKind::KwFetch,
        "FIRST" => TokenKind::KwFirst,
        "NEXT" => TokenKind::KwNext,
        "ONLY" => TokenKind::KwOnly,
        "OUTPUT" => TokenKind::KwOutput,
        "ROW" => TokenKind::KwRow,
        "ROWS" => TokenKind::KwRows,
        "TOP" => TokenKind::KwTop,
        _ => return None,
    };
    Some(kw)
}

/// Dialect-neutral table: accepts `LIMIT` and `OFFSET .. FETCH` forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericKeywords;

impl KeywordTable for GenericKeywords {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Generic
    }

    fn lookup_dialect_keyword(&self, upper: &str) -> Option<TokenKind> {
        if upper == "LIMIT" {
            return Some(TokenKind::KwLimit);
        }
        match sqlserver_keyword(upper) {
            Some(TokenKind::KwTop | TokenKind::KwOutput) => None,
            other => other,
        }
    }
}

/// Keyword table for `database_type`.
#[must_use]
pub fn keywords_for(database_type: DatabaseType) -> &'static dyn KeywordTable {
    match database_type {
        DatabaseType::MySql => &MySqlKeywords,
        DatabaseType::SqlServer => &SqlServerKeywords,
        DatabaseType::Generic => &GenericKeywords,
    }
}
