//! Statement routing.
//!
//! Turns a parsed statement plus bound parameters into one
//! [`ExecutionUnit`] per physical target: pick data nodes per logic table,
//! combine tables that appear together, widen pagination when the
//! statement fans out, and rewrite the SQL for each target.

use std::collections::BTreeMap;
use std::sync::Arc;

use shardline_error::{Result, ShardError};
use shardline_parser::{Condition, ConditionOperator, LimitValue, SqlParser, SqlStatement};
use shardline_rewrite::{GeneratedKey, RewriteTarget, SqlRewriter};
use shardline_types::{DatabaseType, ShardValue, SqlKind};
use tracing::debug;

use crate::algorithm::{ShardingValue, ShardingValues};
use crate::config::DataNode;
use crate::keygen::{KeyGenerator, TimeSequenceKeyGenerator};
use crate::rule::{ShardingRule, TableRule};

/// One physical statement: where it runs, its SQL, and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<ShardValue>,
}

/// Pagination as the application wrote it, resolved against parameters.
///
/// Per-shard SQL carries the widened form; a merge step applies these
/// values to the combined rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub kind: SqlKind,
    pub units: Vec<ExecutionUnit>,
    pub pagination: Option<Pagination>,
    /// Key generated for an INSERT that omitted its key column.
    pub generated_key: Option<ShardValue>,
}

/// Logic table -> physical table, for one target.
type Assignment = Vec<(String, String)>;

/// Routes statements against one [`ShardingRule`].
#[derive(Debug, Clone)]
pub struct SqlRouter {
    rule: Arc<ShardingRule>,
    parser: SqlParser,
    key_generator: Arc<dyn KeyGenerator>,
}

impl SqlRouter {
    #[must_use]
    pub fn new(rule: Arc<ShardingRule>, database_type: DatabaseType) -> Self {
        Self {
            rule,
            parser: SqlParser::new(database_type),
            key_generator: Arc::new(TimeSequenceKeyGenerator::default()),
        }
    }

    #[must_use]
    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    #[must_use]
    pub fn rule(&self) -> &ShardingRule {
        &self.rule
    }

    #[must_use]
    pub const fn database_type(&self) -> DatabaseType {
        self.parser.database_type()
    }

    /// Parse `sql` and route it.
    pub fn route_sql(&self, sql: &str, parameters: &[ShardValue]) -> Result<RouteResult> {
        let stmt = self.parser.parse(sql)?;
        self.route(&stmt, sql, parameters)
    }

    /// Route an already parsed statement. `sql` must be the text `stmt`
    /// was parsed from.
    pub fn route(
        &self,
        stmt: &SqlStatement,
        sql: &str,
        parameters: &[ShardValue],
    ) -> Result<RouteResult> {
        let ruled: Vec<&TableRule> = stmt
            .tables
            .names()
            .filter_map(|name| self.rule.find_table_rule(name))
            .collect();
        let Some(primary) = ruled.first().copied() else {
            return self.route_to_default(stmt, sql, parameters);
        };

        if stmt.kind == SqlKind::Insert && stmt.insert_rows > 1 {
            return Err(ShardError::unsupported(format!(
                "multi-row INSERT into sharded table '{}'",
                primary.logic_table()
            )));
        }

        let generated_key = self.generate_key(stmt, primary);
        let key_binding = generated_key
            .as_ref()
            .and_then(|key| primary.generated_key_column().map(|c| (c, key)));

        let values = sharding_values(primary, stmt, parameters, key_binding)?;
        let mut by_source: BTreeMap<String, Vec<Assignment>> = BTreeMap::new();
        for node in primary.route(&values)? {
            by_source
                .entry(node.data_source)
                .or_default()
                .push(vec![(primary.logic_table().to_owned(), node.table)]);
        }

        for table in ruled.iter().skip(1) {
            if self.rule.is_binding(primary.logic_table(), table.logic_table()) {
                bind_tables(&mut by_source, primary, table)?;
            } else {
                let values = sharding_values(table, stmt, parameters, None)?;
                join_tables(&mut by_source, table, &table.route(&values)?);
            }
        }

        let unit_count: usize = by_source.values().map(Vec::len).sum();
        let mut bound = parameters.to_vec();
        let mut template = RewriteTarget::new();
        let pagination = widen_pagination(stmt, unit_count, &mut bound, &mut template)?;
        template.generated_key = match (primary.generated_key_column(), &generated_key) {
            (Some(column), Some(value)) => Some(GeneratedKey {
                column: column.to_owned(),
                value: value.clone(),
            }),
            _ => None,
        };

        let mut units = Vec::with_capacity(unit_count);
        for (data_source, assignments) in by_source {
            for assignment in assignments {
                let mut target = template.clone();
                for (logic, physical) in &assignment {
                    target.insert_table(logic, physical.clone());
                }
                let rewritten = SqlRewriter::rewrite(sql, &stmt.tokens, &target, &bound)?;
                units.push(ExecutionUnit {
                    data_source: data_source.clone(),
                    sql: rewritten.sql,
                    parameters: rewritten.parameters,
                });
            }
        }

        debug!(
            target: "shardline.route",
            kind = %stmt.kind,
            table = primary.logic_table(),
            units = units.len(),
            widened = pagination.is_some() && units.len() > 1,
            "routed statement"
        );
        Ok(RouteResult {
            kind: stmt.kind,
            units,
            pagination,
            generated_key,
        })
    }

    fn route_to_default(
        &self,
        stmt: &SqlStatement,
        sql: &str,
        parameters: &[ShardValue],
    ) -> Result<RouteResult> {
        let Some(default) = self.rule.default_data_source() else {
            return Err(ShardError::NoShardingRule {
                table: stmt.tables.names().next().unwrap_or_default().to_owned(),
            });
        };
        debug!(
            target: "shardline.route",
            kind = %stmt.kind,
            data_source = default,
            "no sharded table; using default data source"
        );
        Ok(RouteResult {
            kind: stmt.kind,
            units: vec![ExecutionUnit {
                data_source: default.to_owned(),
                sql: sql.to_owned(),
                parameters: parameters.to_vec(),
            }],
            pagination: None,
            generated_key: None,
        })
    }

    fn generate_key(&self, stmt: &SqlStatement, primary: &TableRule) -> Option<ShardValue> {
        if stmt.kind != SqlKind::Insert || stmt.generated_key_token().is_none() {
            return None;
        }
        let column = primary.generated_key_column()?;
        if stmt.has_insert_column(column) {
            return None;
        }
        Some(self.key_generator.generate_key())
    }
}

/// Pinned values for `table`'s sharding columns.
fn sharding_values(
    table: &TableRule,
    stmt: &SqlStatement,
    parameters: &[ShardValue],
    generated: Option<(&str, &ShardValue)>,
) -> Result<ShardingValues> {
    let mut values = ShardingValues::new();
    for column in table.sharding_columns() {
        if let Some((key_column, key)) = generated {
            if key_column.eq_ignore_ascii_case(column) {
                values.insert(column.to_owned(), ShardingValue::Single(key.clone()));
                continue;
            }
        }
        if let Some(condition) = stmt.conditions.find(table.logic_table(), column) {
            values.insert(column.to_owned(), condition_value(condition, parameters)?);
        }
    }
    Ok(values)
}

fn condition_value(condition: &Condition, parameters: &[ShardValue]) -> Result<ShardingValue> {
    let mut values = condition
        .values
        .iter()
        .map(|v| v.resolve(parameters))
        .collect::<Result<Vec<_>>>()?;
    match condition.operator {
        ConditionOperator::In => Ok(ShardingValue::List(values)),
        ConditionOperator::Equal if values.len() == 1 => {
            Ok(ShardingValue::Single(values.remove(0)))
        }
        ConditionOperator::Between if values.len() == 2 => {
            let upper = values.remove(1);
            let lower = values.remove(0);
            Ok(ShardingValue::Range { lower, upper })
        }
        op => Err(ShardError::internal(format!(
            "{} condition on '{}' has {} values",
            op.as_str(),
            condition.column.name,
            values.len()
        ))),
    }
}

/// Give `bound` the physical table at the primary table's index.
fn bind_tables(
    by_source: &mut BTreeMap<String, Vec<Assignment>>,
    primary: &TableRule,
    bound: &TableRule,
) -> Result<()> {
    for (data_source, assignments) in by_source.iter_mut() {
        let bound_tables = bound.tables_in(data_source);
        for assignment in assignments.iter_mut() {
            let primary_table = &assignment[0].1;
            let physical = primary
                .table_index(data_source, primary_table)
                .and_then(|i| bound_tables.get(i))
                .ok_or_else(|| {
                    ShardError::Config(format!(
                        "binding table '{}' has no counterpart of '{primary_table}' in '{data_source}'",
                        bound.logic_table()
                    ))
                })?;
            assignment.push((bound.logic_table().to_owned(), physical.clone()));
        }
    }
    Ok(())
}

/// Cartesian product with `table`'s nodes inside each data source. Data
/// sources lacking the table drop out.
fn join_tables(
    by_source: &mut BTreeMap<String, Vec<Assignment>>,
    table: &TableRule,
    nodes: &[DataNode],
) {
    by_source.retain(|data_source, assignments| {
        let tables: Vec<&str> = nodes
            .iter()
            .filter(|n| n.data_source == *data_source)
            .map(|n| n.table.as_str())
            .collect();
        let mut joined = Vec::with_capacity(assignments.len() * tables.len());
        for assignment in assignments.iter() {
            for physical in &tables {
                let mut next = assignment.clone();
                next.push((table.logic_table().to_owned(), (*physical).to_owned()));
                joined.push(next);
            }
        }
        *assignments = joined;
        !assignments.is_empty()
    });
}

/// Record pagination and, when the statement fans out, rewrite each shard
/// to `LIMIT offset + row_count OFFSET 0`.
fn widen_pagination(
    stmt: &SqlStatement,
    unit_count: usize,
    parameters: &mut [ShardValue],
    target: &mut RewriteTarget,
) -> Result<Option<Pagination>> {
    let Some(limit) = stmt.limit.filter(|l| l.rewritable) else {
        return Ok(None);
    };
    let (offset, row_count) = limit.resolve(parameters)?;
    if unit_count > 1 {
        match limit.offset {
            Some(LimitValue::Literal(_)) => target.offset = Some(0),
            Some(LimitValue::Placeholder(index)) => {
                if let Some(slot) = parameters.get_mut(index) {
                    *slot = ShardValue::Integer(0);
                }
            }
            None => {}
        }
        if let Some(widened) = row_count.map(|n| offset.saturating_add(n)) {
            match limit.row_count {
                Some(LimitValue::Literal(_)) => target.row_count = Some(widened),
                Some(LimitValue::Placeholder(index)) => {
                    if let Some(slot) = parameters.get_mut(index) {
                        *slot = ShardValue::Integer(widened);
                    }
                }
                None => {}
            }
        }
    }
    Ok(Some(Pagination { offset, row_count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::ExpressionRegistry;
    use crate::config::ShardingConfig;

    #[derive(Debug)]
    struct FixedKey(i64);

    impl KeyGenerator for FixedKey {
        fn generate_key(&self) -> ShardValue {
            ShardValue::Integer(self.0)
        }
    }

    fn router(json: &str) -> SqlRouter {
        let config = ShardingConfig::from_json_str(json).unwrap();
        let rule = ShardingRule::from_config(&config, &ExpressionRegistry::new()).unwrap();
        SqlRouter::new(Arc::new(rule), DatabaseType::MySql)
            .with_key_generator(Arc::new(FixedKey(10)))
    }

    const FOUR_TABLES: &str = r#"{
        "data_sources": ["ds_0"],
        "tables": [{
            "logic_table": "orders",
            "actual_data_nodes": "ds_0.orders_${0..3}",
            "table_strategy": {"sharding_columns": ["user_id"], "algorithm": {"type": "modulo"}}
        }]
    }"#;

    const TWO_BY_TWO: &str = r#"{
        "data_sources": ["ds_0", "ds_1"],
        "tables": [
            {
                "logic_table": "orders",
                "actual_data_nodes": "ds_${0..1}.orders_${0..1}",
                "database_strategy": {"sharding_columns": ["user_id"], "algorithm": {"type": "modulo"}},
                "table_strategy": {"sharding_columns": ["order_id"], "algorithm": {"type": "modulo"}},
                "generated_key_column": "order_id"
            },
            {
                "logic_table": "order_items",
                "actual_data_nodes": "ds_${0..1}.order_items_${0..1}",
                "database_strategy": {"sharding_columns": ["user_id"], "algorithm": {"type": "modulo"}},
                "table_strategy": {"sharding_columns": ["order_id"], "algorithm": {"type": "modulo"}}
            },
            {"logic_table": "config"}
        ],
        "binding_tables": [["orders", "order_items"]]
    }"#;

    fn sqls(result: &RouteResult) -> Vec<&str> {
        result.units.iter().map(|u| u.sql.as_str()).collect()
    }

    // === Single-shard routing ===

    #[test]
    fn test_update_routes_to_one_shard() {
        let router = router(FOUR_TABLES);
        let params = vec![ShardValue::from("paid"), ShardValue::Integer(42)];
        let result = router
            .route_sql("UPDATE orders SET status=? WHERE user_id=?", &params)
            .unwrap();
        assert_eq!(result.kind, SqlKind::Update);
        assert_eq!(
            result.units,
            vec![ExecutionUnit {
                data_source: "ds_0".to_owned(),
                sql: "UPDATE orders_2 SET status=? WHERE user_id=?".to_owned(),
                parameters: params,
            }]
        );
    }

    #[test]
    fn test_in_list_routes_to_each_matching_shard() {
        let result = router(FOUR_TABLES)
            .route_sql("SELECT * FROM orders WHERE user_id IN (1, 5, 2)", &[])
            .unwrap();
        assert_eq!(
            sqls(&result),
            vec![
                "SELECT * FROM orders_1 WHERE user_id IN (1, 5, 2)",
                "SELECT * FROM orders_2 WHERE user_id IN (1, 5, 2)",
            ]
        );
    }

    #[test]
    fn test_or_broadcasts() {
        let result = router(FOUR_TABLES)
            .route_sql("DELETE FROM orders WHERE user_id = 1 OR status = 'x'", &[])
            .unwrap();
        assert_eq!(result.units.len(), 4);
    }

    // === Pagination ===

    #[test]
    fn test_fan_out_widens_literal_limit() {
        let result = router(FOUR_TABLES)
            .route_sql("SELECT * FROM orders ORDER BY id LIMIT 5 OFFSET 3", &[])
            .unwrap();
        assert_eq!(result.units.len(), 4);
        for unit in &result.units {
            assert!(unit.sql.ends_with("LIMIT 8 OFFSET 0"), "{}", unit.sql);
        }
        assert_eq!(
            result.pagination,
            Some(Pagination {
                offset: 3,
                row_count: Some(5)
            })
        );
    }

    #[test]
    fn test_fan_out_widens_placeholder_limit() {
        let params = vec![ShardValue::Integer(3), ShardValue::Integer(5)];
        let result = router(FOUR_TABLES)
            .route_sql("SELECT * FROM orders LIMIT ?, ?", &params)
            .unwrap();
        for unit in &result.units {
            assert!(unit.sql.ends_with("LIMIT ?, ?"));
            assert_eq!(unit.parameters, vec![ShardValue::Integer(0), ShardValue::Integer(8)]);
        }
    }

    #[test]
    fn test_single_shard_keeps_limit() {
        let result = router(FOUR_TABLES)
            .route_sql("SELECT * FROM orders WHERE user_id = 4 LIMIT 3, 5", &[])
            .unwrap();
        assert_eq!(sqls(&result), vec!["SELECT * FROM orders_0 WHERE user_id = 4 LIMIT 3, 5"]);
        assert!(result.pagination.is_some());
    }

    // === Multi-table ===

    #[test]
    fn test_binding_tables_share_suffix() {
        let result = router(TWO_BY_TWO)
            .route_sql(
                "SELECT * FROM orders o JOIN order_items i ON o.order_id = i.order_id \
                 WHERE o.user_id = 1",
                &[],
            )
            .unwrap();
        assert_eq!(
            result.units.iter().map(|u| u.data_source.as_str()).collect::<Vec<_>>(),
            vec!["ds_1", "ds_1"]
        );
        assert_eq!(
            sqls(&result),
            vec![
                "SELECT * FROM orders_0 o JOIN order_items_0 i ON o.order_id = i.order_id \
                 WHERE o.user_id = 1",
                "SELECT * FROM orders_1 o JOIN order_items_1 i ON o.order_id = i.order_id \
                 WHERE o.user_id = 1",
            ]
        );
    }

    #[test]
    fn test_unbound_tables_cartesian_per_source() {
        let result = router(TWO_BY_TWO)
            .route_sql("SELECT * FROM orders, config WHERE user_id = 2", &[])
            .unwrap();
        assert_eq!(
            sqls(&result),
            vec![
                "SELECT * FROM orders_0, config WHERE user_id = 2",
                "SELECT * FROM orders_1, config WHERE user_id = 2",
            ]
        );
        assert!(result.units.iter().all(|u| u.data_source == "ds_0"));
    }

    // === Inserts ===

    #[test]
    fn test_insert_generates_missing_key() {
        let params = vec![ShardValue::Integer(3), ShardValue::from("new")];
        let result = router(TWO_BY_TWO)
            .route_sql("INSERT INTO orders (user_id, status) VALUES (?, ?)", &params)
            .unwrap();
        assert_eq!(result.generated_key, Some(ShardValue::Integer(10)));
        assert_eq!(
            result.units,
            vec![ExecutionUnit {
                data_source: "ds_1".to_owned(),
                sql: "INSERT INTO orders_0 (user_id, status, order_id) VALUES (?, ?, ?)".to_owned(),
                parameters: vec![
                    ShardValue::Integer(3),
                    ShardValue::from("new"),
                    ShardValue::Integer(10)
                ],
            }]
        );
    }

    #[test]
    fn test_insert_with_explicit_key() {
        let result = router(TWO_BY_TWO)
            .route_sql("INSERT INTO orders (user_id, order_id) VALUES (2, 7)", &[])
            .unwrap();
        assert!(result.generated_key.is_none());
        assert_eq!(
            sqls(&result),
            vec!["INSERT INTO orders_1 (user_id, order_id) VALUES (2, 7)"]
        );
        assert_eq!(result.units[0].data_source, "ds_0");
    }

    #[test]
    fn test_multi_row_insert_is_unsupported() {
        let err = router(TWO_BY_TWO)
            .route_sql("INSERT INTO orders (user_id, order_id) VALUES (1, 1), (2, 2)", &[])
            .unwrap_err();
        assert!(matches!(err, ShardError::Unsupported { .. }));
    }

    // === Defaults and errors ===

    #[test]
    fn test_unsharded_table_uses_default() {
        let json = r#"{"default_data_source": "main", "data_sources": ["main"], "tables": []}"#;
        let result = router(json)
            .route_sql("SELECT * FROM users WHERE id = ?", &[ShardValue::Integer(1)])
            .unwrap();
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.units[0].data_source, "main");
        assert_eq!(result.units[0].sql, "SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_unsharded_table_without_default() {
        let err = router(FOUR_TABLES).route_sql("SELECT * FROM users", &[]).unwrap_err();
        assert!(matches!(err, ShardError::NoShardingRule { ref table } if table == "users"));
        assert!(err.is_terminal_before_execution());
    }

    #[test]
    fn test_missing_parameter_and_parse_errors() {
        let router = router(FOUR_TABLES);
        let err = router
            .route_sql("SELECT * FROM orders WHERE user_id = ?", &[])
            .unwrap_err();
        assert!(matches!(err, ShardError::MissingParameter { index: 0 }));
        let err = router.route_sql("UPDATE orders status = 1", &[]).unwrap_err();
        assert!(matches!(err, ShardError::Parse { .. }));
    }
}
