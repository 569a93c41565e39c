//! Plain and prepared statements over a [`LogicalConnection`].

use std::collections::HashMap;

use shardline_core::{
    BatchExecutor, ExecutionContext, GeneratedKeys, ResultSet, StatementExecutor, StatementUnit,
};
use shardline_error::{Result, ShardError};
use shardline_parser::SqlStatement;
use shardline_router::{ExecutionUnit, Pagination, RouteResult};
use shardline_types::{ShardValue, SqlKind};
use tracing::debug;

use crate::datasource::LogicalConnection;

/// Per-shard result sets plus the pagination a merge step should apply.
///
/// Rows are not merged here. When the statement fanned out, each shard was
/// asked for `offset + row_count` rows starting at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub result_sets: Vec<ResultSet>,
    pub pagination: Option<Pagination>,
}

impl QueryResult {
    /// Total rows across all shards.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.result_sets.iter().map(ResultSet::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Plain statements
// ---------------------------------------------------------------------------

/// Executes SQL text routed per call.
#[derive(Debug)]
pub struct ShardingStatement<'c> {
    connection: &'c LogicalConnection,
    context: ExecutionContext,
    generated_key: Option<ShardValue>,
}

impl<'c> ShardingStatement<'c> {
    pub(crate) fn new(connection: &'c LogicalConnection) -> Self {
        Self {
            connection,
            context: connection.default_context(),
            generated_key: None,
        }
    }

    /// Whether a failing shard aborts the call (`true`) or leaves an empty
    /// slot that is skipped or counted as zero.
    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.context.fail_fast = fail_fast;
    }

    /// Add a value to the context every unit's callback sees.
    pub fn set_context_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context = std::mem::take(&mut self.context).with_value(key, value);
    }

    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Key generated by the last INSERT, if one was generated.
    #[must_use]
    pub fn generated_key(&self) -> Option<&ShardValue> {
        self.generated_key.as_ref()
    }

    pub fn execute_query(&mut self, sql: &str) -> Result<QueryResult> {
        let route = self.connection.router().route_sql(sql, &[])?;
        run_query(self.connection, &self.context, route)
    }

    pub fn execute_update(&mut self, sql: &str) -> Result<u64> {
        self.execute_update_with_keys(sql, GeneratedKeys::None)
    }

    /// Update, asking drivers to retain the selected generated keys.
    pub fn execute_update_with_keys(&mut self, sql: &str, keys: GeneratedKeys) -> Result<u64> {
        let route = self.connection.router().route_sql(sql, &[])?;
        self.generated_key.clone_from(&route.generated_key);
        run_update(self.connection, &self.context, route, keys)
    }

    pub fn execute(&mut self, sql: &str) -> Result<bool> {
        let route = self.connection.router().route_sql(sql, &[])?;
        self.generated_key.clone_from(&route.generated_key);
        run_execute(self.connection, &self.context, route)
    }
}

// ---------------------------------------------------------------------------
// Prepared statements
// ---------------------------------------------------------------------------

/// Parsed once, routed on every execution with the bound parameters.
#[derive(Debug)]
pub struct ShardingPreparedStatement<'c> {
    connection: &'c LogicalConnection,
    sql: String,
    statement: SqlStatement,
    parameters: Vec<ShardValue>,
    context: ExecutionContext,
    generated_key: Option<ShardValue>,
    batch: Vec<RouteResult>,
}

impl<'c> ShardingPreparedStatement<'c> {
    pub(crate) fn new(connection: &'c LogicalConnection, sql: &str) -> Result<Self> {
        let statement = shardline_parser::parse(sql, connection.router().database_type())?;
        Ok(Self {
            connection,
            sql: sql.to_owned(),
            statement,
            parameters: Vec::new(),
            context: connection.default_context(),
            generated_key: None,
            batch: Vec::new(),
        })
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn kind(&self) -> SqlKind {
        self.statement.kind
    }

    /// Number of `?` placeholders in the statement.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.statement.parameter_index
    }

    /// Bind the placeholder at zero-based `index`.
    pub fn set_parameter(&mut self, index: usize, value: impl Into<ShardValue>) {
        if self.parameters.len() <= index {
            self.parameters.resize(index + 1, ShardValue::Null);
        }
        self.parameters[index] = value.into();
    }

    /// Replace all bound parameters.
    pub fn set_parameters(&mut self, parameters: Vec<ShardValue>) {
        self.parameters = parameters;
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.context.fail_fast = fail_fast;
    }

    pub fn set_context_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context = std::mem::take(&mut self.context).with_value(key, value);
    }

    #[must_use]
    pub fn generated_key(&self) -> Option<&ShardValue> {
        self.generated_key.as_ref()
    }

    pub fn execute_query(&mut self) -> Result<QueryResult> {
        let route = self.route()?;
        run_query(self.connection, &self.context, route)
    }

    pub fn execute_update(&mut self) -> Result<u64> {
        self.execute_update_with_keys(GeneratedKeys::None)
    }

    pub fn execute_update_with_keys(&mut self, keys: GeneratedKeys) -> Result<u64> {
        let route = self.route()?;
        self.generated_key.clone_from(&route.generated_key);
        run_update(self.connection, &self.context, route, keys)
    }

    pub fn execute(&mut self) -> Result<bool> {
        let route = self.route()?;
        self.generated_key.clone_from(&route.generated_key);
        run_execute(self.connection, &self.context, route)
    }

    /// Route the current parameters and queue them as the next batch entry.
    /// Parameters are cleared afterwards.
    pub fn add_batch(&mut self) -> Result<()> {
        let route = self.route()?;
        self.batch.push(route);
        self.parameters.clear();
        Ok(())
    }

    #[must_use]
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Run every queued entry. Entries that route to the same data source
    /// and SQL share one physical batch. Returns affected rows per entry in
    /// [`add_batch`](Self::add_batch) order.
    pub fn execute_batch(&mut self) -> Result<Vec<u64>> {
        let entries = std::mem::take(&mut self.batch);
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let batch_count = entries.len();
        let grouped = group_batch(entries);
        debug!(
            target: "shardline.execute",
            entries = batch_count,
            units = grouped.len(),
            "grouped batch entries"
        );

        let kind = self.statement.kind;
        let units = grouped
            .into_iter()
            .map(|group| {
                let connection = self.connection.get_connection(&group.data_source, kind)?;
                Ok(StatementUnit {
                    data_source: group.data_source,
                    sql: group.sql,
                    parameter_sets: group.parameter_sets,
                    batch_indexes: group.batch_indexes,
                    connection,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        BatchExecutor::new(self.connection.engine(), self.context.clone(), units, batch_count)
            .execute_batch()
    }

    fn route(&self) -> Result<RouteResult> {
        let expected = self.statement.parameter_index;
        if self.parameters.len() < expected {
            return Err(ShardError::MissingParameter {
                index: self.parameters.len(),
            });
        }
        self.connection
            .router()
            .route(&self.statement, &self.sql, &self.parameters)
    }
}

// ---------------------------------------------------------------------------
// Shared execution paths
// ---------------------------------------------------------------------------

fn run_query(
    connection: &LogicalConnection,
    context: &ExecutionContext,
    route: RouteResult,
) -> Result<QueryResult> {
    let pagination = route.pagination;
    let units = connection.bind(route)?;
    let result_sets =
        StatementExecutor::new(connection.engine(), context.clone(), units).execute_query()?;
    Ok(QueryResult {
        result_sets,
        pagination,
    })
}

fn run_update(
    connection: &LogicalConnection,
    context: &ExecutionContext,
    route: RouteResult,
    keys: GeneratedKeys,
) -> Result<u64> {
    let units = connection.bind(route)?;
    StatementExecutor::new(connection.engine(), context.clone(), units).execute_update(keys)
}

fn run_execute(
    connection: &LogicalConnection,
    context: &ExecutionContext,
    route: RouteResult,
) -> Result<bool> {
    let units = connection.bind(route)?;
    StatementExecutor::new(connection.engine(), context.clone(), units).execute()
}

struct BatchGroup {
    data_source: String,
    sql: String,
    parameter_sets: Vec<Vec<ShardValue>>,
    batch_indexes: Vec<usize>,
}

/// Merge routed entries by (data source, SQL), in first-seen order.
fn group_batch(entries: Vec<RouteResult>) -> Vec<BatchGroup> {
    let mut groups: Vec<BatchGroup> = Vec::new();
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    for (entry, route) in entries.into_iter().enumerate() {
        for ExecutionUnit {
            data_source,
            sql,
            parameters,
        } in route.units
        {
            let key = (data_source, sql);
            let position = *positions.entry(key.clone()).or_insert_with(|| {
                groups.push(BatchGroup {
                    data_source: key.0.clone(),
                    sql: key.1.clone(),
                    parameter_sets: Vec::new(),
                    batch_indexes: Vec::new(),
                });
                groups.len() - 1
            });
            groups[position].parameter_sets.push(parameters);
            groups[position].batch_indexes.push(entry);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(units: &[(&str, &str, i64)]) -> RouteResult {
        RouteResult {
            kind: SqlKind::Insert,
            units: units
                .iter()
                .map(|&(ds, sql, v)| ExecutionUnit {
                    data_source: ds.to_owned(),
                    sql: sql.to_owned(),
                    parameters: vec![ShardValue::Integer(v)],
                })
                .collect(),
            pagination: None,
            generated_key: None,
        }
    }

    #[test]
    fn test_group_batch_merges_identical_targets() {
        let groups = group_batch(vec![
            route(&[("ds_0", "INSERT INTO t_0 VALUES (?)", 0)]),
            route(&[("ds_1", "INSERT INTO t_1 VALUES (?)", 1)]),
            route(&[("ds_0", "INSERT INTO t_0 VALUES (?)", 2)]),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].data_source, "ds_0");
        assert_eq!(groups[0].batch_indexes, vec![0, 2]);
        assert_eq!(
            groups[0].parameter_sets,
            vec![vec![ShardValue::Integer(0)], vec![ShardValue::Integer(2)]]
        );
        assert_eq!(groups[1].batch_indexes, vec![1]);
    }

    #[test]
    fn test_group_batch_keeps_fanned_out_entries() {
        let groups = group_batch(vec![route(&[
            ("ds_0", "DELETE FROM t_0 WHERE a=?", 5),
            ("ds_1", "DELETE FROM t_1 WHERE a=?", 5),
        ])]);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.batch_indexes == vec![0]));
    }

    mod proptest_batch {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn grouping_keeps_every_entry(targets in proptest::collection::vec(0_usize..4, 1..32)) {
                let entries: Vec<RouteResult> = targets
                    .iter()
                    .map(|&t| {
                        let sql = format!("INSERT INTO t_{t} VALUES (?)");
                        route(&[("ds_0", sql.as_str(), 0)])
                    })
                    .collect();
                let groups = group_batch(entries);
                let mut seen: Vec<usize> = groups
                    .iter()
                    .flat_map(|g| g.batch_indexes.iter().copied())
                    .collect();
                seen.sort_unstable();
                prop_assert_eq!(seen, (0..targets.len()).collect::<Vec<_>>());
                for group in &groups {
                    prop_assert_eq!(group.parameter_sets.len(), group.batch_indexes.len());
                    prop_assert!(group.batch_indexes.windows(2).all(|w| w[0] < w[1]));
                }
            }
        }
    }
}
