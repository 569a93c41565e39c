//! Statement-shaped entry points over [`ExecutorEngine`].

use shardline_error::Result;

use crate::datasource::{GeneratedKeys, ResultSet};
use crate::engine::{ExecutionContext, ExecutorEngine, StatementUnit};

/// Executes one routed statement across its units.
#[derive(Debug)]
pub struct StatementExecutor<'a> {
    engine: &'a ExecutorEngine,
    context: ExecutionContext,
    units: Vec<StatementUnit>,
}

impl<'a> StatementExecutor<'a> {
    #[must_use]
    pub fn new(
        engine: &'a ExecutorEngine,
        context: ExecutionContext,
        units: Vec<StatementUnit>,
    ) -> Self {
        Self {
            engine,
            context,
            units,
        }
    }

    /// One result set per unit that succeeded, in unit order.
    pub fn execute_query(self) -> Result<Vec<ResultSet>> {
        let results = self.engine.execute(&self.context, self.units, |_, unit, conn| {
            conn.query(&unit.sql, unit.parameters())
        })?;
        Ok(results.into_iter().flatten().collect())
    }

    /// Sum of affected rows over all units. Units whose failure was
    /// swallowed count as zero.
    pub fn execute_update(self, keys: GeneratedKeys) -> Result<u64> {
        let results = self.engine.execute(&self.context, self.units, move |_, unit, conn| {
            conn.update(&unit.sql, unit.parameters(), &keys)
        })?;
        Ok(results.into_iter().map(|count| count.unwrap_or(0)).sum())
    }

    /// Whether the first unit produced a result set.
    pub fn execute(self) -> Result<bool> {
        let results = self.engine.execute(&self.context, self.units, |_, unit, conn| {
            conn.execute(&unit.sql, unit.parameters())
        })?;
        Ok(results.into_iter().next().flatten().unwrap_or(false))
    }
}

/// Executes grouped batch units and folds counts back onto logical batch
/// entries.
#[derive(Debug)]
pub struct BatchExecutor<'a> {
    engine: &'a ExecutorEngine,
    context: ExecutionContext,
    units: Vec<StatementUnit>,
    batch_count: usize,
}

impl<'a> BatchExecutor<'a> {
    #[must_use]
    pub fn new(
        engine: &'a ExecutorEngine,
        context: ExecutionContext,
        units: Vec<StatementUnit>,
        batch_count: usize,
    ) -> Self {
        Self {
            engine,
            context,
            units,
            batch_count,
        }
    }

    /// Affected rows per logical batch entry, summed over every shard the
    /// entry reached.
    pub fn execute_batch(self) -> Result<Vec<u64>> {
        let index_map: Vec<Vec<usize>> =
            self.units.iter().map(|u| u.batch_indexes.clone()).collect();
        let results = self.engine.execute(&self.context, self.units, |_, unit, conn| {
            conn.execute_batch(&unit.sql, &unit.parameter_sets)
        })?;

        let mut totals = vec![0_u64; self.batch_count];
        for (indexes, counts) in index_map.iter().zip(results) {
            let Some(counts) = counts else {
                continue;
            };
            for (&entry, count) in indexes.iter().zip(counts) {
                if let Some(total) = totals.get_mut(entry) {
                    *total += count;
                }
            }
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutorConfig;
    use crate::testing::{scripted, CallLog};
    use shardline_error::ShardError;
    use shardline_types::ShardValue;
    use std::time::Duration;

    fn engine() -> ExecutorEngine {
        ExecutorEngine::new(ExecutorConfig {
            executor_size: 2,
            shutdown_grace_ms: 1_000,
        })
        .unwrap()
    }

    fn unit(name: &str, sql: &str, log: &CallLog, fail: bool) -> StatementUnit {
        StatementUnit {
            data_source: name.to_owned(),
            sql: sql.to_owned(),
            parameter_sets: vec![vec![ShardValue::Integer(7)]],
            batch_indexes: Vec::new(),
            connection: scripted(name, log, Duration::ZERO, fail),
        }
    }

    #[test]
    fn test_query_collects_result_sets_in_order() {
        let log = CallLog::default();
        let engine = engine();
        let units = vec![
            unit("ds_0", "SELECT * FROM t_0", &log, false),
            unit("ds_1", "SELECT * FROM t_1", &log, false),
        ];
        let sets = StatementExecutor::new(&engine, ExecutionContext::default(), units)
            .execute_query()
            .unwrap();
        let sources: Vec<&ShardValue> = sets.iter().map(|rs| &rs.rows[0][0]).collect();
        assert_eq!(
            sources,
            vec![&ShardValue::Text("ds_0".into()), &ShardValue::Text("ds_1".into())]
        );
    }

    #[test]
    fn test_query_skips_swallowed_failures() {
        let log = CallLog::default();
        let engine = engine();
        let units = vec![
            unit("ds_0", "SELECT 1", &log, true),
            unit("ds_1", "SELECT 1", &log, false),
        ];
        let sets = StatementExecutor::new(&engine, ExecutionContext::new(false), units)
            .execute_query()
            .unwrap();
        assert_eq!(sets.len(), 1);
    }

    #[test]
    fn test_update_sums_counts() {
        let log = CallLog::default();
        let engine = engine();
        let units = vec![
            unit("ds_0", "UPDATE t_0 SET a=?", &log, false),
            unit("ds_1", "UPDATE t_1 SET a=?", &log, false),
            unit("ds_2", "UPDATE t_2 SET a=?", &log, true),
        ];
        let total = StatementExecutor::new(&engine, ExecutionContext::new(false), units)
            .execute_update(GeneratedKeys::None)
            .unwrap();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_update_fail_fast() {
        let log = CallLog::default();
        let engine = engine();
        let units = vec![
            unit("ds_0", "UPDATE t_0 SET a=?", &log, false),
            unit("ds_1", "UPDATE t_1 SET a=?", &log, true),
        ];
        let err = StatementExecutor::new(&engine, ExecutionContext::default(), units)
            .execute_update(GeneratedKeys::Return)
            .unwrap_err();
        assert!(matches!(err, ShardError::Physical { .. }));
    }

    #[test]
    fn test_execute_reports_first_unit() {
        let log = CallLog::default();
        let engine = engine();
        let units = vec![unit("ds_0", "SELECT 1", &log, false)];
        assert!(StatementExecutor::new(&engine, ExecutionContext::default(), units)
            .execute()
            .unwrap());
        let units = vec![unit("ds_0", "DELETE FROM t_0", &log, false)];
        assert!(!StatementExecutor::new(&engine, ExecutionContext::default(), units)
            .execute()
            .unwrap());
    }

    #[test]
    fn test_batch_counts_fold_onto_entries() {
        let log = CallLog::default();
        let engine = engine();
        let mut a = unit("ds_0", "INSERT INTO t_0 VALUES (?)", &log, false);
        a.parameter_sets = vec![vec![ShardValue::Integer(0)], vec![ShardValue::Integer(2)]];
        a.batch_indexes = vec![0, 2];
        let mut b = unit("ds_1", "INSERT INTO t_1 VALUES (?)", &log, false);
        b.parameter_sets = vec![vec![ShardValue::Integer(1)], vec![ShardValue::Integer(2)]];
        b.batch_indexes = vec![1, 2];

        let counts = BatchExecutor::new(&engine, ExecutionContext::default(), vec![a, b], 3)
            .execute_batch()
            .unwrap();
        assert_eq!(counts, vec![1, 1, 2]);
        assert_eq!(log.lock().len(), 2);
    }
}
