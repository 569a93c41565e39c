// Token types for the routing lexer.
//
// Every token carries a discriminant and a byte-offset Span into the
// original SQL. Keywords are their own variants so clause parsers can
// match them directly; which words count as keywords is decided per
// dialect by a `KeywordTable`.

use std::fmt;

/// Half-open byte range `[start, end)` into the original SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const ZERO: Self = Self { start: 0, end: 0 };

    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span at `pos`, used for pure insertions.
    #[must_use]
    pub const fn point(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start == self.end
    }
}

/// Quoting style of a delimited identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteStyle {
    /// `` `name` `` (MySQL).
    Backtick,
    /// `[name]` (SQL Server).
    Bracket,
    /// `"name"` (ANSI).
    Double,
}

impl QuoteStyle {
    /// Wrap `name` in this quoting style.
    #[must_use]
    pub fn quote(self, name: &str) -> String {
        match self {
            Self::Backtick => format!("`{}`", name.replace('`', "``")),
            Self::Bracket => format!("[{name}]"),
            Self::Double => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

/// A single token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token discriminant.
    pub kind: TokenKind,
    /// Byte-offset span into the original source.
    pub span: Span,
    /// Line number (1-based) at the start of the token.
    pub line: u32,
    /// Column number (1-based) at the start of the token.
    pub col: u32,
}

/// Token discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === Literals ===
    /// Integer literal: `42`, `0xFF`.
    Integer(i64),
    /// Float literal: `3.14`, `1e10`, `.5`; also integers too large for i64.
    Float(f64),
    /// String literal (single-quoted), unescaped.
    String(String),

    // === Identifiers ===
    /// Unquoted identifier.
    Id(String),
    /// Delimited identifier with its quoting style.
    QuotedId(String, QuoteStyle),
    /// `@name` or `@@name` variable.
    Variable(String),

    // === Bind parameters ===
    /// `?` anonymous positional.
    Question,

    // === Operators ===
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    ShiftLeft,
    ShiftRight,
    Eq,     // `=`
    EqEq,   // `==`
    Ne,     // `!=`
    LtGt,   // `<>`
    NullSafeEq, // `<=>`
    Lt,
    Le,
    Gt,
    Ge,
    Concat, // `||`
    ColonEq, // `:=`

    // === Punctuation ===
    Dot,
    Comma,
    Semicolon,
    LeftParen,
    RightParen,

    // === Keywords shared by every dialect ===
    KwAll,
    KwAlter,
    KwAnd,
    KwAs,
    KwAsc,
    KwBetween,
    KwBy,
    KwCase,
    KwCheck,
    KwConstraint,
    KwCreate,
    KwCross,
    KwDefault,
    KwDelete,
    KwDesc,
    KwDistinct,
    KwDrop,
    KwElse,
    KwEnd,
    KwEscape,
    KwExcept,
    KwExists,
    KwFalse,
    KwFor,
    KwForeign,
    KwFrom,
    KwFull,
    KwGlobal,
    KwGroup,
    KwHaving,
    KwIf,
    KwIn,
    KwIndex,
    KwInner,
    KwInsert,
    KwIntersect,
    KwInto,
    KwIs,
    KwJoin,
    KwKey,
    KwLeft,
    KwLike,
    KwLocal,
    KwNatural,
    KwNot,
    KwNull,
    KwOffset,
    KwOn,
    KwOr,
    KwOrder,
    KwOuter,
    KwPrimary,
    KwReferences,
    KwRight,
    KwSelect,
    KwSet,
    KwTable,
    KwTemp,
    KwTemporary,
    KwThen,
    KwTrue,
    KwTruncate,
    KwUnion,
    KwUnique,
    KwUpdate,
    KwUsing,
    KwValues,
    KwWhen,
    KwWhere,
    KwWith,

    // === MySQL keywords ===
    KwDelayed,
    KwDuplicate,
    KwForce,
    KwHighPriority,
    KwIgnore,
    KwLimit,
    KwLowPriority,
    KwQuick,
    KwReplace,
    KwStraightJoin,
    KwUse,
    KwValue,

    // === SQL Server keywords ===
    KwFetch,
    KwFirst,
    KwNext,
    KwOnly,
    KwOutput,
    KwRow,
    KwRows,
    KwTop,

    // === Special ===
    /// End of input.
    Eof,
}

impl TokenKind {
    /// Keywords recognized by every dialect. `upper` must already be
    /// ASCII-uppercased.
    #[must_use]
    pub fn lookup_common_keyword(upper: &str) -> Option<Self> {
        let kw = match upper {
            "ALL" => Self::KwAll,
            "ALTER" => Self::KwAlter,
            "AND" => Self::KwAnd,
            "AS" => Self::KwAs,
            "ASC" => Self::KwAsc,
            "BETWEEN" => Self::KwBetween,
            "BY" => Self::KwBy,
            "CASE" => Self::KwCase,
            "CHECK" => Self::KwCheck,
            "CONSTRAINT" => Self::KwConstraint,
            "CREATE" => Self::KwCreate,
            "CROSS" => Self::KwCross,
            "DEFAULT" => Self::KwDefault,
            "DELETE" => Self::KwDelete,
            "DESC" => Self::KwDesc,
            "DISTINCT" => Self::KwDistinct,
            "DROP" => Self::KwDrop,
            "ELSE" => Self::KwElse,
            "END" => Self::KwEnd,
            "ESCAPE" => Self::KwEscape,
            "EXCEPT" => Self::KwExcept,
            "EXISTS" => Self::KwExists,
            "FALSE" => Self::KwFalse,
            "FOR" => Self::KwFor,
            "FOREIGN" => Self::KwForeign,
            "FROM" => Self::KwFrom,
            "FULL" => Self::KwFull,
            "GLOBAL" => Self::KwGlobal,
            "GROUP" => Self::KwGroup,
            "HAVING" => Self::KwHaving,
            "IF" => Self::KwIf,
            "IN" => Self::KwIn,
            "INDEX" => Self::KwIndex,
            "INNER" => Self::KwInner,
            "INSERT" => Self::KwInsert,
            "INTERSECT" => Self::KwIntersect,
            "INTO" => Self::KwInto,
            "IS" => Self::KwIs,
            "JOIN" => Self::KwJoin,
            "KEY" => Self::KwKey,
            "LEFT" => Self::KwLeft,
            "LIKE" => Self::KwLike,
            "LOCAL" => Self::KwLocal,
            "NATURAL" => Self::KwNatural,
            "NOT" => Self::KwNot,
            "NULL" => Self::KwNull,
            "OFFSET" => Self::KwOffset,
            "ON" => Self::KwOn,
            "OR" => Self::KwOr,
            "ORDER" => Self::KwOrder,
            "OUTER" => Self::KwOuter,
            "PRIMARY" => Self::KwPrimary,
            "REFERENCES" => Self::KwReferences,
            "RIGHT" => Self::KwRight,
            "SELECT" => Self::KwSelect,
            "SET" => Self::KwSet,
            "TABLE" => Self::KwTable,
            "TEMP" => Self::KwTemp,
            "TEMPORARY" => Self::KwTemporary,
            "THEN" => Self::KwThen,
            "TRUE" => Self::KwTrue,
            "TRUNCATE" => Self::KwTruncate,
            "UNION" => Self::KwUnion,
            "UNIQUE" => Self::KwUnique,
            "UPDATE" => Self::KwUpdate,
            "USING" => Self::KwUsing,
            "VALUES" => Self::KwValues,
            "WHEN" => Self::KwWhen,
            "WHERE" => Self::KwWhere,
            "WITH" => Self::KwWith,
            _ => return None,
        };
        Some(kw)
    }

    /// Returns true for any keyword variant.
    #[must_use]
    pub fn is_keyword(&self) -> bool {
        !matches!(
            self,
            Self::Integer(_)
                | Self::Float(_)
                | Self::String(_)
                | Self::Id(_)
                | Self::QuotedId(..)
                | Self::Variable(_)
                | Self::Question
                | Self::Plus
                | Self::Minus
                | Self::Star
                | Self::Slash
                | Self::Percent
                | Self::Ampersand
                | Self::Pipe
                | Self::Caret
                | Self::Tilde
                | Self::ShiftLeft
                | Self::ShiftRight
                | Self::Eq
                | Self::EqEq
                | Self::Ne
                | Self::LtGt
                | Self::NullSafeEq
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::Concat
                | Self::ColonEq
                | Self::Dot
                | Self::Comma
                | Self::Semicolon
                | Self::LeftParen
                | Self::RightParen
                | Self::Eof
        )
    }

    /// Returns true if this token can name a table or column.
    #[must_use]
    pub const fn is_identifier(&self) -> bool {
        matches!(self, Self::Id(_) | Self::QuotedId(..))
    }

    /// Same variant, ignoring payloads.
    #[must_use]
    pub fn same_variant(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "integer {i}"),
            Self::Float(v) => write!(f, "number {v}"),
            Self::String(s) => write!(f, "string '{s}'"),
            Self::Id(s) => write!(f, "identifier {s}"),
            Self::QuotedId(s, style) => write!(f, "identifier {}", style.quote(s)),
            Self::Variable(s) => write!(f, "variable @{s}"),
            Self::Question => f.write_str("'?'"),
            Self::Eof => f.write_str("end of input"),
            other => {
                let dbg = format!("{other:?}");
                match dbg.strip_prefix("Kw") {
                    Some(kw) => write!(f, "keyword {}", keyword_text(kw)),
                    None => write!(f, "'{}'", punctuation_text(other)),
                }
            }
        }
    }
}

/// `StraightJoin` -> `STRAIGHT_JOIN`.
fn keyword_text(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 2);
    for (i, ch) in camel.chars().enumerate() {
        if i > 0 && ch.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

fn punctuation_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Ampersand => "&",
        TokenKind::Pipe => "|",
        TokenKind::Caret => "^",
        TokenKind::Tilde => "~",
        TokenKind::ShiftLeft => "<<",
        TokenKind::ShiftRight => ">>",
        TokenKind::Eq => "=",
        TokenKind::EqEq => "==",
        TokenKind::Ne => "!=",
        TokenKind::LtGt => "<>",
        TokenKind::NullSafeEq => "<=>",
        TokenKind::Lt => "<",
        TokenKind::Le => "<=",
        TokenKind::Gt => ">",
        TokenKind::Ge => ">=",
        TokenKind::Concat => "||",
        TokenKind::ColonEq => ":=",
        TokenKind::Dot => ".",
        TokenKind::Comma => ",",
        TokenKind::Semicolon => ";",
        TokenKind::LeftParen => "(",
        TokenKind::RightParen => ")",
        _ => "?",
    }
}
