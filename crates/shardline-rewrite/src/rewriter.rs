// Rewrite tokens to edits, per target shard.
//
// The parser records where logical names and pagination literals sit in
// the original SQL. For each execution unit the router supplies the
// physical values; this module turns the tokens into edits and keeps the
// bound parameter list in step with any placeholder it adds.

use std::collections::BTreeMap;

use shardline_error::Result;
use shardline_parser::RewriteToken;
use shardline_types::ShardValue;
use tracing::trace;

use crate::edit::{apply_edits, SqlEdit};

/// A generated key to splice into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub column: String,
    pub value: ShardValue,
}

/// Physical values for one execution unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteTarget {
    /// Lowercased logical table name -> physical table name.
    tables: BTreeMap<String, String>,
    /// Replacement for a literal row count.
    pub row_count: Option<i64>,
    /// Replacement for a literal offset.
    pub offset: Option<i64>,
    pub generated_key: Option<GeneratedKey>,
}

impl RewriteTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `logic` to `physical` (case-insensitive on `logic`).
    #[must_use]
    pub fn with_table(mut self, logic: &str, physical: impl Into<String>) -> Self {
        self.insert_table(logic, physical);
        self
    }

    pub fn insert_table(&mut self, logic: &str, physical: impl Into<String>) {
        self.tables.insert(logic.to_ascii_lowercase(), physical.into());
    }

    #[must_use]
    pub fn physical_table(&self, logic: &str) -> Option<&str> {
        self.tables
            .get(&logic.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Rewritten SQL and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteResult {
    pub sql: String,
    pub parameters: Vec<ShardValue>,
}

/// Expand `tokens` into edits for `target`.
///
/// Tokens without a physical value (unmapped tables, pagination the router
/// left alone) produce no edit. When `use_placeholder` is false a generated
/// key is written as a literal.
#[must_use]
pub fn edits_for(
    tokens: &[RewriteToken],
    target: &RewriteTarget,
    use_placeholder: bool,
) -> Vec<SqlEdit> {
    let mut edits = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            RewriteToken::Table { span, name, quote } => {
                if let Some(physical) = target.physical_table(name) {
                    let text = match quote {
                        Some(style) => style.quote(physical),
                        None => physical.to_owned(),
                    };
                    edits.push(SqlEdit::replace(*span, text));
                }
            }
            RewriteToken::Offset { span, .. } => {
                if let Some(offset) = target.offset {
                    edits.push(SqlEdit::replace(*span, offset.to_string()));
                }
            }
            RewriteToken::RowCount { span, .. } => {
                if let Some(row_count) = target.row_count {
                    edits.push(SqlEdit::replace(*span, row_count.to_string()));
                }
            }
            RewriteToken::GeneratedKey {
                columns_end,
                values_end,
                ..
            } => {
                if let Some(key) = &target.generated_key {
                    edits.push(SqlEdit::insert(*columns_end, format!(", {}", key.column)));
                    let value = if use_placeholder {
                        "?".to_owned()
                    } else {
                        key.value.to_sql_literal()
                    };
                    edits.push(SqlEdit::insert(*values_end, format!(", {value}")));
                }
            }
        }
    }
    // Generated-key edits are emitted as a pair; restore position order.
    edits.sort_by_key(|e: &SqlEdit| (e.span.start, e.span.end));
    edits
}

/// Stateless rewriter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlRewriter;

impl SqlRewriter {
    /// Rewrite `sql` for one execution unit.
    ///
    /// A generated key is bound as a new placeholder when the statement has
    /// parameters, and inlined as a literal otherwise.
    pub fn rewrite(
        sql: &str,
        tokens: &[RewriteToken],
        target: &RewriteTarget,
        parameters: &[ShardValue],
    ) -> Result<RewriteResult> {
        let use_placeholder = !parameters.is_empty();
        let edits = edits_for(tokens, target, use_placeholder);
        let rewritten = apply_edits(sql, &edits)?;

        let mut bound = parameters.to_vec();
        if use_placeholder {
            let key_slot = tokens.iter().find_map(|t| match t {
                RewriteToken::GeneratedKey {
                    parameter_index, ..
                } => Some(*parameter_index),
                _ => None,
            });
            if let (Some(index), Some(key)) = (key_slot, &target.generated_key) {
                bound.insert(index.min(bound.len()), key.value.clone());
            }
        }

        trace!(
            target: "shardline.rewrite",
            edits = edits.len(),
            parameters = bound.len(),
            "rewrote statement"
        );
        Ok(RewriteResult {
            sql: rewritten,
            parameters: bound,
        })
    }
}

/// Rewrite without parameters; generated keys are inlined.
pub fn rewrite(sql: &str, tokens: &[RewriteToken], target: &RewriteTarget) -> Result<String> {
    apply_edits(sql, &edits_for(tokens, target, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_parser::{parse, QuoteStyle};
    use shardline_types::DatabaseType;

    #[test]
    fn test_table_and_pagination_rewrite() {
        let sql = "SELECT * FROM `orders` o WHERE o.user_id = 3 LIMIT 3, 5";
        let stmt = parse(sql, DatabaseType::MySql).unwrap();
        let mut target = RewriteTarget::new().with_table("ORDERS", "orders_3");
        target.offset = Some(0);
        target.row_count = Some(8);
        assert_eq!(
            rewrite(sql, &stmt.tokens, &target).unwrap(),
            "SELECT * FROM `orders_3` o WHERE o.user_id = 3 LIMIT 0, 8"
        );
    }

    #[test]
    fn test_unmapped_tokens_are_left_alone() {
        let sql = "SELECT * FROM orders LIMIT 10";
        let stmt = parse(sql, DatabaseType::MySql).unwrap();
        assert_eq!(rewrite(sql, &stmt.tokens, &RewriteTarget::new()).unwrap(), sql);
    }

    #[test]
    fn test_generated_key_placeholder_keeps_parameters_in_step() {
        let sql = "INSERT INTO orders (user_id, status) VALUES (?, ?)";
        let stmt = parse(sql, DatabaseType::MySql).unwrap();
        let target = RewriteTarget {
            generated_key: Some(GeneratedKey {
                column: "order_id".to_owned(),
                value: ShardValue::Integer(1001),
            }),
            ..RewriteTarget::new().with_table("orders", "orders_1")
        };
        let params = vec![ShardValue::Integer(7), ShardValue::from("new")];
        let result = SqlRewriter::rewrite(sql, &stmt.tokens, &target, &params).unwrap();
        assert_eq!(
            result.sql,
            "INSERT INTO orders_1 (user_id, status, order_id) VALUES (?, ?, ?)"
        );
        assert_eq!(
            result.parameters,
            vec![
                ShardValue::Integer(7),
                ShardValue::from("new"),
                ShardValue::Integer(1001)
            ]
        );
    }

    fn key_target(value: i64) -> RewriteTarget {
        RewriteTarget {
            generated_key: Some(GeneratedKey {
                column: "order_id".to_owned(),
                value: ShardValue::Integer(value),
            }),
            ..RewriteTarget::new()
        }
    }

    #[test]
    fn test_generated_key_precedes_later_placeholders() {
        let sql = "INSERT INTO orders (user_id) VALUES (7) ON DUPLICATE KEY UPDATE hits = ?";
        let stmt = parse(sql, DatabaseType::MySql).unwrap();
        let params = vec![ShardValue::Integer(1)];
        let result = SqlRewriter::rewrite(sql, &stmt.tokens, &key_target(5), &params).unwrap();
        assert_eq!(
            result.sql,
            "INSERT INTO orders (user_id, order_id) VALUES (7, ?) ON DUPLICATE KEY UPDATE hits = ?"
        );
        assert_eq!(
            result.parameters,
            vec![ShardValue::Integer(5), ShardValue::Integer(1)]
        );
    }

    #[test]
    fn test_generated_key_literal_without_parameters() {
        let sql = "INSERT INTO orders (a) VALUES (1)";
        let stmt = parse(sql, DatabaseType::MySql).unwrap();
        let result = SqlRewriter::rewrite(sql, &stmt.tokens, &key_target(5), &[]).unwrap();
        assert_eq!(result.sql, "INSERT INTO orders (a, order_id) VALUES (1, 5)");
        assert!(result.parameters.is_empty());
    }

    #[test]
    fn test_quote_style_is_preserved() {
        let sql = "UPDATE [orders] SET [orders].status = 1";
        let stmt = parse(sql, DatabaseType::SqlServer).unwrap();
        let target = RewriteTarget::new().with_table("orders", "orders_0");
        assert_eq!(
            rewrite(sql, &stmt.tokens, &target).unwrap(),
            "UPDATE [orders_0] SET [orders_0].status = 1"
        );
        assert_eq!(QuoteStyle::Bracket.quote("x"), "[x]");
    }
}
