//! Physical data-source capabilities.
//!
//! The core never pools or implements drivers. It asks a [`DataSource`] to
//! open a [`PhysicalConnection`] and keeps the handle for the lifetime of a
//! logical connection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardline_error::{Result, ShardError};
use shardline_types::{IsolationLevel, ShardValue};

use crate::master_slave::MasterSlaveDataSource;

/// Rows returned by one physical query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ShardValue>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ShardValue>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which generated keys an update should make retrievable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeneratedKeys {
    #[default]
    None,
    /// Whatever the driver reports as auto-generated.
    Return,
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

/// An open connection to one physical database.
///
/// Handles are not assumed safe for concurrent use; the core serializes
/// access through [`SharedConnection`].
pub trait PhysicalConnection: Send {
    fn query(&mut self, sql: &str, parameters: &[ShardValue]) -> Result<ResultSet>;

    /// Affected row count.
    fn update(&mut self, sql: &str, parameters: &[ShardValue], keys: &GeneratedKeys)
        -> Result<u64>;

    /// `true` when the statement produced a result set.
    fn execute(&mut self, sql: &str, parameters: &[ShardValue]) -> Result<bool>;

    /// One update count per parameter set.
    fn execute_batch(&mut self, sql: &str, parameter_sets: &[Vec<ShardValue>]) -> Result<Vec<u64>>;

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;
    fn set_read_only(&mut self, read_only: bool) -> Result<()>;
    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// A physical connection guarded for exclusive use by one unit at a time.
pub type SharedConnection = Arc<Mutex<Box<dyn PhysicalConnection>>>;

/// Opens physical connections by name.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;
    fn connect(&self) -> Result<Box<dyn PhysicalConnection>>;
}

/// A logical data source: one physical source or a master/slave group.
#[derive(Clone)]
pub enum LogicalDataSource {
    Single(Arc<dyn DataSource>),
    MasterSlave(Arc<MasterSlaveDataSource>),
}

impl fmt::Debug for LogicalDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(ds) => f.debug_tuple("Single").field(&ds.name()).finish(),
            Self::MasterSlave(ms) => f.debug_tuple("MasterSlave").field(ms).finish(),
        }
    }
}

/// Logical name -> logical data source.
#[derive(Debug, Clone, Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<String, LogicalDataSource>,
}

impl DataSourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain source under its own name.
    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        self.sources
            .insert(source.name().to_owned(), LogicalDataSource::Single(source));
    }

    /// Register a master/slave group under the group name.
    pub fn register_master_slave(&mut self, group: MasterSlaveDataSource) {
        self.sources.insert(
            group.name().to_owned(),
            LogicalDataSource::MasterSlave(Arc::new(group)),
        );
    }

    pub fn get(&self, name: &str) -> Result<&LogicalDataSource> {
        self.sources.get(name).ok_or_else(|| ShardError::NoDataSource {
            name: name.to_owned(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl DataSource for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn connect(&self) -> Result<Box<dyn PhysicalConnection>> {
            Err(ShardError::physical(self.0, "offline"))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DataSourceRegistry::new();
        registry.register(Arc::new(Named("ds_1")));
        registry.register(Arc::new(Named("ds_0")));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ds_0", "ds_1"]);
        assert!(registry.contains("ds_0"));
        assert!(matches!(registry.get("ds_0"), Ok(LogicalDataSource::Single(_))));
        assert!(matches!(
            registry.get("nope"),
            Err(ShardError::NoDataSource { ref name }) if name == "nope"
        ));
    }

    #[test]
    fn test_result_set_len() {
        let rs = ResultSet::new(
            vec!["id".to_owned()],
            vec![vec![ShardValue::Integer(1)], vec![ShardValue::Integer(2)]],
        );
        assert_eq!(rs.len(), 2);
        assert!(ResultSet::default().is_empty());
    }
}
