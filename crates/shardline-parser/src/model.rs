//! Routing facts extracted from one SQL statement.
//!
//! A [`SqlStatement`] is filled in by the clause parsers and is read-only
//! once parsing returns. Rewrite tokens refer to byte spans of the original
//! SQL text; they are kept sorted by position.

use shardline_error::{Result, ShardError};
use shardline_types::{ShardValue, SqlKind};

use crate::cursor::Identifier;
use crate::token::{QuoteStyle, Span};

/// A logical table referenced by the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// Ordered, de-duplicated set of referenced tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    items: Vec<TableRef>,
}

impl Tables {
    /// Add a table unless one with the same name is already present.
    pub fn add(&mut self, table: TableRef) {
        match self.items.iter_mut().find(|t| t.name.eq_ignore_ascii_case(&table.name)) {
            Some(existing) => {
                if existing.alias.is_none() {
                    existing.alias = table.alias;
                }
            }
            None => self.items.push(table),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableRef> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The table name when exactly one table is referenced.
    #[must_use]
    pub fn single_name(&self) -> Option<&str> {
        match self.items.as_slice() {
            [only] => Some(&only.name),
            _ => None,
        }
    }

    /// Whether `name` is a referenced table name (not an alias).
    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.items.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Resolve a column qualifier (table name or alias) to a table name.
    #[must_use]
    pub fn resolve_owner(&self, owner: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|t| t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(owner)))
            .or_else(|| self.items.iter().find(|t| t.name.eq_ignore_ascii_case(owner)))
            .map(|t| t.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|t| t.name.as_str())
    }
}

/// A (possibly qualified) column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Owning table name (after alias resolution), if qualified.
    pub table: Option<String>,
    pub name: String,
}

impl Column {
    #[must_use]
    pub fn new(table: Option<&str>, name: &str) -> Self {
        Self {
            table: table.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    /// Whether this column can refer to `column` of `table`.
    #[must_use]
    pub fn matches(&self, table: &str, column: &str) -> bool {
        self.name.eq_ignore_ascii_case(column)
            && self
                .table
                .as_deref()
                .map_or(true, |t| t.eq_ignore_ascii_case(table))
    }
}

/// A literal or a reference to a bound placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Literal(ShardValue),
    /// Zero-based index into the bound parameter list.
    Placeholder(usize),
}

impl ConditionValue {
    /// Resolve against bound parameters.
    pub fn resolve(&self, parameters: &[ShardValue]) -> Result<ShardValue> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Placeholder(index) => parameters
                .get(*index)
                .cloned()
                .ok_or(ShardError::MissingParameter { index: *index }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equal,
    In,
    Between,
}

impl ConditionOperator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::In => "IN",
            Self::Between => "BETWEEN",
        }
    }
}

/// `column = v`, `column IN (v, ..)`, or `column BETWEEN a AND b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: Column,
    pub operator: ConditionOperator,
    pub values: Vec<ConditionValue>,
}

/// Conjunction of narrowing predicates.
///
/// Once a top-level `OR` is seen the set can no longer narrow routing and
/// every table is broadcast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    items: Vec<Condition>,
    unusable: bool,
}

impl Conditions {
    pub fn add(&mut self, condition: Condition) {
        if !self.unusable {
            self.items.push(condition);
        }
    }

    /// Drop all predicates and refuse new ones.
    pub fn mark_unusable(&mut self) {
        self.unusable = true;
        self.items.clear();
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.unusable
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First predicate on `table.column`.
    #[must_use]
    pub fn find(&self, table: &str, column: &str) -> Option<&Condition> {
        self.items.iter().find(|c| c.column.matches(table, column))
    }

    fn resolve_owners(&mut self, tables: &Tables) {
        for cond in &mut self.items {
            if let Some(owner) = cond.column.table.take() {
                let resolved = tables.resolve_owner(&owner).map_or(owner, str::to_owned);
                cond.column.table = Some(resolved);
            }
        }
    }
}

/// One pagination bound: literal XOR placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitValue {
    Literal(i64),
    /// Zero-based index into the bound parameter list.
    Placeholder(usize),
}

impl LimitValue {
    pub fn resolve(self, parameters: &[ShardValue]) -> Result<i64> {
        match self {
            Self::Literal(v) => Ok(v),
            Self::Placeholder(index) => {
                let value = parameters
                    .get(index)
                    .ok_or(ShardError::MissingParameter { index })?;
                value.to_sharding_integer().ok_or_else(|| {
                    ShardError::rewrite(format!(
                        "pagination parameter {index} is not an integer: {value}"
                    ))
                })
            }
        }
    }
}

/// Normalized pagination: `LIMIT o, n`, `LIMIT n OFFSET o`, and
/// `OFFSET o ROWS FETCH NEXT n ROWS ONLY` all become `{row_count: n, offset: o}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub row_count: Option<LimitValue>,
    pub offset: Option<LimitValue>,
    /// Whether per-shard widening may be applied.
    pub rewritable: bool,
}

impl Limit {
    /// `(offset, row_count)` resolved against bound parameters.
    pub fn resolve(&self, parameters: &[ShardValue]) -> Result<(i64, Option<i64>)> {
        let offset = match self.offset {
            Some(v) => v.resolve(parameters)?,
            None => 0,
        };
        let row_count = self.row_count.map(|v| v.resolve(parameters)).transpose()?;
        Ok((offset, row_count))
    }
}

/// A recorded substitution point in the original SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteToken {
    /// Logical table name to be replaced by a physical one.
    Table {
        span: Span,
        name: String,
        quote: Option<QuoteStyle>,
    },
    /// Literal pagination offset.
    Offset { span: Span, value: i64 },
    /// Literal pagination row count.
    RowCount { span: Span, value: i64 },
    /// Insertion points for a generated key column and its value.
    GeneratedKey {
        /// Position of the `)` closing the INSERT column list.
        columns_end: usize,
        /// Position of the `)` closing the VALUES row.
        values_end: usize,
        /// Placeholders consumed before `values_end`.
        parameter_index: usize,
    },
}

impl RewriteToken {
    #[must_use]
    pub fn table(ident: &Identifier) -> Self {
        Self::Table {
            span: ident.span,
            name: ident.name.clone(),
            quote: ident.quote,
        }
    }

    /// Start position in the original SQL.
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            Self::Table { span, .. } | Self::Offset { span, .. } | Self::RowCount { span, .. } => {
                span.start
            }
            Self::GeneratedKey { columns_end, .. } => *columns_end,
        }
    }
}

/// A qualifier seen before the table list was complete; resolved when
/// parsing finishes.
#[derive(Debug, Clone)]
pub(crate) struct PendingQualifier {
    pub(crate) owner: Identifier,
}

/// The parsed facts of one statement.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub kind: SqlKind,
    pub tables: Tables,
    pub conditions: Conditions,
    /// Sorted by position once parsing completes.
    pub tokens: Vec<RewriteToken>,
    /// Count of `?` placeholders in the statement.
    pub parameter_index: usize,
    pub limit: Option<Limit>,
    /// Column names of an INSERT column list.
    pub insert_columns: Vec<String>,
    /// Rows in an INSERT VALUES list.
    pub insert_rows: usize,
    pub(crate) qualifiers: Vec<PendingQualifier>,
}

impl SqlStatement {
    #[must_use]
    pub fn new(kind: SqlKind) -> Self {
        Self {
            kind,
            tables: Tables::default(),
            conditions: Conditions::default(),
            tokens: Vec::new(),
            parameter_index: 0,
            limit: None,
            insert_columns: Vec::new(),
            insert_rows: 0,
            qualifiers: Vec::new(),
        }
    }

    /// Record a referenced table and its rewrite point.
    pub fn add_table(&mut self, ident: &Identifier, alias: Option<String>) {
        self.tables.add(TableRef {
            name: ident.name.clone(),
            alias,
        });
        self.tokens.push(RewriteToken::table(ident));
    }

    /// Remember `owner` from an `owner.column` reference.
    pub(crate) fn add_qualifier(&mut self, owner: Identifier) {
        self.qualifiers.push(PendingQualifier { owner });
    }

    /// Whether the insert column list names `column`.
    #[must_use]
    pub fn has_insert_column(&self, column: &str) -> bool {
        self.insert_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// The recorded generated-key insertion point, if any.
    #[must_use]
    pub fn generated_key_token(&self) -> Option<&RewriteToken> {
        self.tokens
            .iter()
            .find(|t| matches!(t, RewriteToken::GeneratedKey { .. }))
    }

    /// Resolve qualifiers and aliases, then order tokens by position.
    pub(crate) fn finish(&mut self, parameter_index: usize) {
        self.parameter_index = parameter_index;
        for pending in std::mem::take(&mut self.qualifiers) {
            let owner = &pending.owner.name;
            let is_alias = self
                .tables
                .iter()
                .any(|t| t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(owner)));
            if !is_alias && self.tables.contains_name(owner) {
                self.tokens.push(RewriteToken::table(&pending.owner));
            }
        }
        self.conditions.resolve_owners(&self.tables);
        self.tokens.sort_by_key(RewriteToken::position);
        self.tokens.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str, start: usize) -> Identifier {
        Identifier {
            name: name.to_owned(),
            span: Span::new(start, start + name.len()),
            quote: None,
        }
    }

    #[test]
    fn test_tables_deduplicate_and_resolve_aliases() {
        let mut tables = Tables::default();
        tables.add(TableRef {
            name: "orders".to_owned(),
            alias: Some("o".to_owned()),
        });
        tables.add(TableRef {
            name: "ORDERS".to_owned(),
            alias: None,
        });
        assert_eq!(tables.len(), 1);
        assert_eq!(tables.single_name(), Some("orders"));
        assert_eq!(tables.resolve_owner("O"), Some("orders"));
        assert_eq!(tables.resolve_owner("orders"), Some("orders"));
        assert_eq!(tables.resolve_owner("x"), None);
    }

    #[test]
    fn test_or_makes_conditions_unusable() {
        let mut conditions = Conditions::default();
        conditions.add(Condition {
            column: Column::new(None, "user_id"),
            operator: ConditionOperator::Equal,
            values: vec![ConditionValue::Literal(ShardValue::Integer(1))],
        });
        assert!(conditions.find("orders", "USER_ID").is_some());
        conditions.mark_unusable();
        assert!(conditions.is_empty());
        conditions.add(Condition {
            column: Column::new(None, "user_id"),
            operator: ConditionOperator::Equal,
            values: vec![],
        });
        assert!(conditions.is_empty());
        assert!(!conditions.is_usable());
    }

    #[test]
    fn test_limit_resolves_placeholders() {
        let limit = Limit {
            row_count: Some(LimitValue::Placeholder(1)),
            offset: Some(LimitValue::Literal(3)),
            rewritable: true,
        };
        let params = [ShardValue::from("x"), ShardValue::Integer(5)];
        assert_eq!(limit.resolve(&params).unwrap(), (3, Some(5)));
        assert!(matches!(
            limit.resolve(&params[..1]),
            Err(ShardError::MissingParameter { index: 1 })
        ));
    }

    #[test]
    fn test_finish_resolves_qualifiers_and_sorts_tokens() {
        let mut stmt = SqlStatement::new(SqlKind::Select);
        stmt.add_table(&ident("orders", 30), Some("o".to_owned()));
        stmt.add_table(&ident("items", 45), None);
        stmt.add_qualifier(ident("items", 7));
        stmt.add_qualifier(ident("o", 20));
        stmt.add_qualifier(ident("unknown", 12));
        stmt.finish(0);
        let positions: Vec<usize> = stmt.tokens.iter().map(RewriteToken::position).collect();
        assert_eq!(positions, vec![7, 30, 45]);
    }

    #[test]
    fn test_condition_owner_alias_resolution() {
        let mut stmt = SqlStatement::new(SqlKind::Select);
        stmt.add_table(&ident("orders", 14), Some("o".to_owned()));
        stmt.conditions.add(Condition {
            column: Column::new(Some("o"), "user_id"),
            operator: ConditionOperator::Equal,
            values: vec![ConditionValue::Placeholder(0)],
        });
        stmt.finish(1);
        let cond = stmt.conditions.find("orders", "user_id").unwrap();
        assert_eq!(cond.column.table.as_deref(), Some("orders"));
        assert_eq!(stmt.parameter_index, 1);
    }
}
