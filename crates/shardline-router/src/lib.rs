// Sharding rules and statement routing.
//
// A `ShardingRule` is built from declarative configuration; `SqlRouter`
// combines it with a parsed statement and bound parameters to produce one
// execution unit per physical target, rewriting table names and widening
// pagination along the way.

pub mod algorithm;
pub mod config;
pub mod keygen;
pub mod router;
pub mod rule;

pub use algorithm::{
    build_algorithm, ExpressionAlgorithm, ExpressionRegistry, LookupAlgorithm, ModuloAlgorithm,
    RangeAlgorithm, ShardingAlgorithm, ShardingExpression, ShardingStrategy, ShardingValue,
    ShardingValues,
};
pub use config::{
    expand_inline, AlgorithmConfig, DataNode, RangeEntry, ShardingConfig, StrategyConfig,
    TableRuleConfig,
};
pub use keygen::{KeyGenerator, TimeSequenceKeyGenerator};
pub use router::{ExecutionUnit, Pagination, RouteResult, SqlRouter};
pub use rule::{ShardingRule, TableRule};

#[cfg(test)]
mod proptest_routing {
    use std::sync::Arc;

    use proptest::prelude::*;
    use shardline_types::{DatabaseType, ShardValue};

    use super::*;

    fn router(shards: u32) -> SqlRouter {
        let json = format!(
            r#"{{"data_sources": ["ds"], "tables": [{{
                "logic_table": "orders",
                "actual_data_nodes": "ds.orders_${{0..{}}}",
                "table_strategy": {{"sharding_columns": ["user_id"], "algorithm": {{"type": "modulo"}}}}
            }}]}}"#,
            shards - 1
        );
        let config = ShardingConfig::from_json_str(&json).expect("valid config");
        let rule =
            ShardingRule::from_config(&config, &ExpressionRegistry::new()).expect("valid rule");
        SqlRouter::new(Arc::new(rule), DatabaseType::MySql)
    }

    proptest! {
        #[test]
        fn equality_routes_to_modulo_shard(user_id in any::<i64>(), shards in 1u32..16) {
            let params = vec![ShardValue::from("paid"), ShardValue::Integer(user_id)];
            let result = router(shards)
                .route_sql("UPDATE orders SET status = ? WHERE user_id = ?", &params)
                .unwrap();
            prop_assert_eq!(result.units.len(), 1);
            let expected = format!(
                "UPDATE orders_{} SET status = ? WHERE user_id = ?",
                user_id.rem_euclid(i64::from(shards))
            );
            prop_assert_eq!(&result.units[0].sql, &expected);
            prop_assert_eq!(&result.units[0].parameters, &params);
        }

        #[test]
        fn widened_limit_covers_offset(offset in 0i64..1000, rows in 1i64..1000, shards in 2u32..8) {
            let sql = format!("SELECT * FROM orders LIMIT {offset}, {rows}");
            let result = router(shards).route_sql(&sql, &[]).unwrap();
            prop_assert_eq!(result.units.len(), shards as usize);
            let expected = format!("LIMIT 0, {}", offset + rows);
            for unit in &result.units {
                prop_assert!(unit.sql.ends_with(&expected));
            }
        }
    }
}
