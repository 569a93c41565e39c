// Position-based SQL rewriting.
//
// Rewrites are ordered lists of non-overlapping `(span, replacement)` edits
// against the original SQL text, checked and applied in one pass. The
// module is stateless: the same SQL, tokens, and target always yield the
// same output.

pub mod edit;
pub mod rewriter;

pub use edit::{apply_edits, validate_edits, SqlEdit};
pub use rewriter::{edits_for, rewrite, GeneratedKey, RewriteResult, RewriteTarget, SqlRewriter};

#[cfg(test)]
mod proptests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use shardline_parser::parse;
    use shardline_types::{DatabaseType, ShardValue};

    use super::*;

    fn arb_table() -> BoxedStrategy<String> {
        prop::string::string_regex("t_[a-z]{1,6}")
            .expect("valid regex")
            .boxed()
    }

    fn arb_statement() -> BoxedStrategy<String> {
        (arb_table(), arb_table(), 0usize..4, 0i64..50, 1i64..50)
            .prop_map(|(a, b, shape, offset, rows)| match shape {
                0 => format!(
                    "SELECT {a}.id, x.v FROM {a} JOIN {b} x ON {a}.id = x.id \
                     WHERE {a}.k = ? AND x.v IN (1, ?) LIMIT {offset}, {rows}"
                ),
                1 => format!("UPDATE {a} SET {a}.s = ?, n = n + 1 WHERE k = ? AND {a}.z = 'q'"),
                2 => format!("DELETE FROM {a} WHERE k BETWEEN ? AND ? ORDER BY id LIMIT {rows}"),
                _ => format!("INSERT INTO {a} (k, v) VALUES (?, 'x')"),
            })
            .boxed()
    }

    proptest! {
        #[test]
        fn empty_edit_list_is_identity(sql in "[ -~]{0,80}") {
            prop_assert_eq!(apply_edits(&sql, &[]).unwrap(), sql.clone());
            prop_assert_eq!(rewrite(&sql, &[], &RewriteTarget::new()).unwrap(), sql);
        }

        #[test]
        fn relexing_rewritten_sql_preserves_shape(sql in arb_statement(), shard in 0u32..8) {
            let before = parse(&sql, DatabaseType::MySql).unwrap();
            let mut target = RewriteTarget::new();
            for name in before.tables.names() {
                target.insert_table(name, format!("{name}_{shard}"));
            }
            target.row_count = Some(100);
            target.offset = Some(0);
            let params: Vec<ShardValue> = (0..before.parameter_index)
                .map(|i| ShardValue::Integer(i64::try_from(i).unwrap_or(0)))
                .collect();
            let result = SqlRewriter::rewrite(&sql, &before.tokens, &target, &params).unwrap();
            let after = parse(&result.sql, DatabaseType::MySql).unwrap();

            prop_assert_eq!(after.kind, before.kind);
            prop_assert_eq!(after.parameter_index, before.parameter_index);
            prop_assert_eq!(result.parameters.len(), after.parameter_index);
            let expected: BTreeSet<String> = before
                .tables
                .names()
                .map(|n| format!("{n}_{shard}"))
                .collect();
            let actual: BTreeSet<String> = after.tables.names().map(str::to_owned).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
