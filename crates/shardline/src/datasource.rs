//! The logical data source and its connections.

use std::fmt;
use std::sync::Arc;

use shardline_core::{
    DataSourceRegistry, ExecutionContext, ExecutorEngine, ShardingConnection, SharedConnection,
    StatementUnit,
};
use shardline_error::{Result, ShardError};
use shardline_observability::ExecutionObserver;
use shardline_router::{
    ExpressionRegistry, KeyGenerator, RouteResult, ShardingConfig, ShardingRule, SqlRouter,
};
use shardline_types::{IsolationLevel, SqlKind};
use tracing::info;

use crate::properties::ShardingProperties;
use crate::statement::{ShardingPreparedStatement, ShardingStatement};

pub(crate) struct Shared {
    pub(crate) router: SqlRouter,
    pub(crate) registry: Arc<DataSourceRegistry>,
    pub(crate) engine: ExecutorEngine,
    pub(crate) properties: ShardingProperties,
}

/// Entry point: sharding rule, physical data sources, and the executor.
///
/// Cloning is cheap; clones share the executor.
#[derive(Clone)]
pub struct ShardingDataSource {
    shared: Arc<Shared>,
}

impl ShardingDataSource {
    /// Every data source the rule names must be registered.
    pub fn new(
        rule: ShardingRule,
        registry: DataSourceRegistry,
        properties: ShardingProperties,
    ) -> Result<Self> {
        Self::build(rule, registry, properties, None, None)
    }

    /// Build from a JSON [`ShardingConfig`].
    pub fn from_json(
        config_json: &str,
        registry: DataSourceRegistry,
        expressions: &ExpressionRegistry,
        properties: ShardingProperties,
    ) -> Result<Self> {
        let config = ShardingConfig::from_json_str(config_json)?;
        let rule = ShardingRule::from_config(&config, expressions)?;
        Self::new(rule, registry, properties)
    }

    /// Like [`new`](Self::new), with an observer for execution events and an
    /// optional key generator for INSERTs.
    pub fn with_hooks(
        rule: ShardingRule,
        registry: DataSourceRegistry,
        properties: ShardingProperties,
        observer: Arc<dyn ExecutionObserver>,
        key_generator: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<Self> {
        Self::build(rule, registry, properties, Some(observer), key_generator)
    }

    fn build(
        rule: ShardingRule,
        registry: DataSourceRegistry,
        properties: ShardingProperties,
        observer: Option<Arc<dyn ExecutionObserver>>,
        key_generator: Option<Arc<dyn KeyGenerator>>,
    ) -> Result<Self> {
        let required = rule
            .data_source_names()
            .iter()
            .map(String::as_str)
            .chain(rule.default_data_source());
        for name in required {
            if !registry.contains(name) {
                return Err(ShardError::NoDataSource {
                    name: name.to_owned(),
                });
            }
        }

        let mut router = SqlRouter::new(Arc::new(rule), properties.dialect);
        if let Some(key_generator) = key_generator {
            router = router.with_key_generator(key_generator);
        }
        let mut engine = ExecutorEngine::new(properties.executor)?;
        if let Some(observer) = observer {
            engine = engine.with_observer(observer);
        }
        info!(
            target: "shardline.execute",
            dialect = ?properties.dialect,
            data_sources = registry.names().count(),
            tables = router.rule().table_rules().len(),
            "sharding data source ready"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                router,
                registry: Arc::new(registry),
                engine,
                properties,
            }),
        })
    }

    /// Open a new logical connection. Physical connections open lazily.
    #[must_use]
    pub fn connection(&self) -> LogicalConnection {
        LogicalConnection {
            shared: Arc::clone(&self.shared),
            inner: ShardingConnection::new(Arc::clone(&self.shared.registry)),
        }
    }

    #[must_use]
    pub fn router(&self) -> &SqlRouter {
        &self.shared.router
    }

    #[must_use]
    pub fn properties(&self) -> &ShardingProperties {
        &self.shared.properties
    }

    /// Stop the executor. Statements executed afterwards fail once they
    /// fan out.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.engine.shutdown()
    }
}

impl fmt::Debug for ShardingDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardingDataSource")
            .field("router", &self.shared.router)
            .field("registry", &self.shared.registry)
            .field("properties", &self.shared.properties)
            .finish_non_exhaustive()
    }
}

/// One application session over the sharded data sources.
pub struct LogicalConnection {
    shared: Arc<Shared>,
    inner: ShardingConnection,
}

impl LogicalConnection {
    #[must_use]
    pub fn create_statement(&self) -> ShardingStatement<'_> {
        ShardingStatement::new(self)
    }

    /// Parse `sql` once; execute it any number of times with fresh
    /// parameters.
    pub fn prepare_statement(&self, sql: &str) -> Result<ShardingPreparedStatement<'_>> {
        ShardingPreparedStatement::new(self, sql)
    }

    /// The underlying physical-connection cache.
    #[must_use]
    pub fn sharding_connection(&self) -> &ShardingConnection {
        &self.inner
    }

    pub fn get_connection(&self, logical: &str, kind: SqlKind) -> Result<SharedConnection> {
        self.inner.get_connection(logical, kind)
    }

    pub fn get_all_connections(&self, logical: &str) -> Result<Vec<SharedConnection>> {
        self.inner.get_all_connections(logical)
    }

    pub fn release(&self, connection: &SharedConnection) {
        self.inner.release(connection);
    }

    pub fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.inner.set_auto_commit(auto_commit)
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.inner.set_read_only(read_only)
    }

    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.inner.set_transaction_isolation(level)
    }

    #[must_use]
    pub fn auto_commit(&self) -> bool {
        self.inner.auto_commit()
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.inner.read_only()
    }

    pub fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub(crate) fn router(&self) -> &SqlRouter {
        &self.shared.router
    }

    pub(crate) fn engine(&self) -> &ExecutorEngine {
        &self.shared.engine
    }

    pub(crate) fn default_context(&self) -> ExecutionContext {
        ExecutionContext::new(self.shared.properties.fail_fast)
    }

    /// Attach a physical connection to every routed unit.
    pub(crate) fn bind(&self, route: RouteResult) -> Result<Vec<StatementUnit>> {
        let kind = route.kind;
        route
            .units
            .into_iter()
            .map(|unit| {
                let connection = self.inner.get_connection(&unit.data_source, kind)?;
                Ok(StatementUnit::from_unit(unit, connection))
            })
            .collect()
    }
}

impl fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
