//! Connection layer and concurrent execution engine.
//!
//! A [`ShardingConnection`] hands out physical connections per logical data
//! source, honoring master/slave routing. An [`ExecutorEngine`] runs the
//! routed statement units over those connections on a bounded worker pool
//! and returns their outcomes in unit order.

pub mod connection;
pub mod datasource;
pub mod engine;
pub mod executor;
pub mod master_slave;
pub mod pool;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionSettings, ShardingConnection};
pub use datasource::{
    DataSource, DataSourceRegistry, GeneratedKeys, LogicalDataSource, PhysicalConnection,
    ResultSet, SharedConnection,
};
pub use engine::{ExecutionContext, ExecutorConfig, ExecutorEngine, StatementUnit};
pub use executor::{BatchExecutor, StatementExecutor};
pub use master_slave::{LoadBalanceStrategy, MasterSlaveConfig, MasterSlaveDataSource, Role};
pub use pool::WorkerPool;
