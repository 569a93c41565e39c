//! Sharding middleware facade.
//!
//! A [`ShardingDataSource`] combines a sharding rule, the registered physical
//! data sources, and an executor. Statements created from its
//! [`LogicalConnection`]s are parsed, routed to their shards, rewritten, and
//! executed concurrently:
//!
//! ```no_run
//! use shardline::{DataSourceRegistry, ExpressionRegistry, ShardingDataSource, ShardingProperties};
//!
//! # fn main() -> shardline::Result<()> {
//! let config = r#"{
//!     "data_sources": ["ds_0"],
//!     "tables": [{
//!         "logic_table": "orders",
//!         "actual_data_nodes": "ds_0.orders_${0..3}",
//!         "table_strategy": {
//!             "sharding_columns": ["user_id"],
//!             "algorithm": {"type": "modulo", "shard_count": 4}
//!         }
//!     }]
//! }"#;
//! let registry = DataSourceRegistry::new(); // register physical sources here
//! let ds = ShardingDataSource::from_json(
//!     config,
//!     registry,
//!     &ExpressionRegistry::default(),
//!     ShardingProperties::default(),
//! )?;
//! let conn = ds.connection();
//! let mut stmt = conn.prepare_statement("UPDATE orders SET status=? WHERE user_id=?")?;
//! stmt.set_parameter(0, "paid");
//! stmt.set_parameter(1, 42_i64);
//! stmt.execute_update()?;
//! conn.commit()?;
//! # Ok(())
//! # }
//! ```

mod datasource;
mod properties;
mod statement;

pub use datasource::{LogicalConnection, ShardingDataSource};
pub use properties::ShardingProperties;
pub use statement::{QueryResult, ShardingPreparedStatement, ShardingStatement};

pub use shardline_core::{
    DataSource, DataSourceRegistry, ExecutionContext, ExecutorConfig, GeneratedKeys,
    LoadBalanceStrategy, MasterSlaveConfig, MasterSlaveDataSource, PhysicalConnection, ResultSet,
    SharedConnection,
};
pub use shardline_error::{ErrorCategory, Result, ShardError};
pub use shardline_observability::{
    ExecutionEvent, ExecutionEventLog, ExecutionObserver, MetricsObserver, TracingObserver,
};
pub use shardline_router::{
    ExpressionRegistry, KeyGenerator, Pagination, ShardingConfig, ShardingRule,
    TimeSequenceKeyGenerator,
};
pub use shardline_types::{DatabaseType, IsolationLevel, ShardValue, SqlKind};
