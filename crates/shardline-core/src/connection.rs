//! Logical connection over many physical connections.
//!
//! A [`ShardingConnection`] opens physical connections lazily, at most one
//! per (logical data source, master/slave role), and keeps them until it is
//! closed or the handle is released. Settings made on the logical
//! connection are applied to every cached handle and replayed onto handles
//! opened later.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shardline_error::{Result, ShardError};
use shardline_types::{IsolationLevel, SqlKind};
use tracing::{debug, error, warn};

use crate::datasource::{
    DataSource, DataSourceRegistry, LogicalDataSource, PhysicalConnection, SharedConnection,
};
use crate::master_slave::Role;

/// Connection-level settings, replayed onto newly opened handles.
///
/// Only the latest value of each setting is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub auto_commit: Option<bool>,
    pub read_only: Option<bool>,
    pub isolation: Option<IsolationLevel>,
}

impl ConnectionSettings {
    fn apply(&self, conn: &mut dyn PhysicalConnection) -> Result<()> {
        if let Some(auto_commit) = self.auto_commit {
            conn.set_auto_commit(auto_commit)?;
        }
        if let Some(read_only) = self.read_only {
            conn.set_read_only(read_only)?;
        }
        if let Some(level) = self.isolation {
            conn.set_transaction_isolation(level)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CacheKey {
    logical: String,
    /// `None` for a plain data source.
    role: Option<Role>,
}

struct CachedConnection {
    physical: String,
    handle: SharedConnection,
}

#[derive(Default)]
struct ConnectionState {
    cache: BTreeMap<CacheKey, CachedConnection>,
    settings: ConnectionSettings,
    /// A write went through this connection; later reads use masters.
    dml_seen: bool,
    closed: bool,
}

/// One logical session spanning every data source a statement touches.
pub struct ShardingConnection {
    registry: Arc<DataSourceRegistry>,
    state: Mutex<ConnectionState>,
}

impl ShardingConnection {
    #[must_use]
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    /// The physical connection serving `kind` statements on `logical`.
    ///
    /// Repeated calls with the same logical name and resolved role return
    /// the same handle.
    pub fn get_connection(&self, logical: &str, kind: SqlKind) -> Result<SharedConnection> {
        let entry = self.registry.get(logical)?;
        let (key, source, settings) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ShardError::ConnectionClosed);
            }
            let role = match entry {
                LogicalDataSource::Single(_) => None,
                LogicalDataSource::MasterSlave(group) => Some(group.role_for(kind, state.dml_seen)),
            };
            let key = CacheKey {
                logical: logical.to_owned(),
                role,
            };
            if let Some(cached) = state.cache.get(&key) {
                debug!(
                    target: "shardline.connection",
                    logical,
                    physical = %cached.physical,
                    "connection cache hit"
                );
                let handle = Arc::clone(&cached.handle);
                if role.is_some() && kind.is_dml() {
                    state.dml_seen = true;
                }
                return Ok(handle);
            }
            let source = match entry {
                LogicalDataSource::Single(ds) => Arc::clone(ds),
                LogicalDataSource::MasterSlave(group) => {
                    Arc::clone(group.select(role.unwrap_or(Role::Master)))
                }
            };
            (key, source, state.settings)
        };

        let handle = open(source.as_ref(), &settings)?;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            let _ = handle.lock().close();
            return Err(ShardError::ConnectionClosed);
        }
        if let Some(cached) = state.cache.get(&key) {
            let existing = Arc::clone(&cached.handle);
            drop(state);
            let _ = handle.lock().close();
            return Ok(existing);
        }
        if state.settings != settings {
            let applied = state.settings.apply(&mut **handle.lock());
            if let Err(err) = applied {
                drop(state);
                let _ = handle.lock().close();
                return Err(tag(source.name(), err));
            }
        }
        if key.role.is_some() && kind.is_dml() {
            state.dml_seen = true;
        }
        debug!(
            target: "shardline.connection",
            logical,
            physical = source.name(),
            role = ?key.role,
            "opened physical connection"
        );
        state.cache.insert(
            key,
            CachedConnection {
                physical: source.name().to_owned(),
                handle: Arc::clone(&handle),
            },
        );
        Ok(handle)
    }

    /// Fresh connections to every member of `logical`, with settings
    /// replayed. For a master/slave group that is the master and each
    /// slave; these handles are not cached. A plain source returns its
    /// cached connection.
    pub fn get_all_connections(&self, logical: &str) -> Result<Vec<SharedConnection>> {
        match self.registry.get(logical)? {
            LogicalDataSource::Single(_) => {
                Ok(vec![self.get_connection(logical, SqlKind::Select)?])
            }
            LogicalDataSource::MasterSlave(group) => {
                let settings = {
                    let state = self.state.lock();
                    if state.closed {
                        return Err(ShardError::ConnectionClosed);
                    }
                    state.settings
                };
                group
                    .members()
                    .map(|member| open(member.as_ref(), &settings))
                    .collect()
            }
        }
    }

    /// Remove `handle` from the cache and close it. Close errors are logged
    /// and ignored.
    pub fn release(&self, handle: &SharedConnection) {
        let removed = {
            let mut state = self.state.lock();
            let key = state
                .cache
                .iter()
                .find(|(_, cached)| Arc::ptr_eq(&cached.handle, handle))
                .map(|(key, _)| key.clone());
            key.and_then(|key| state.cache.remove(&key))
        };
        let Some(cached) = removed else {
            return;
        };
        let closed = cached.handle.lock().close();
        if let Err(err) = closed {
            warn!(
                target: "shardline.connection",
                physical = %cached.physical,
                error = %err,
                "closing released connection failed"
            );
        }
    }

    /// Number of cached physical connections.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Physical names of cached connections, in cache order.
    #[must_use]
    pub fn cached_data_sources(&self) -> Vec<String> {
        self.state
            .lock()
            .cache
            .values()
            .map(|c| c.physical.clone())
            .collect()
    }

    #[must_use]
    pub fn settings(&self) -> ConnectionSettings {
        self.state.lock().settings
    }

    #[must_use]
    pub fn auto_commit(&self) -> bool {
        self.state.lock().settings.auto_commit.unwrap_or(true)
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.state.lock().settings.read_only.unwrap_or(false)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.update_settings("set_auto_commit", |s| s.auto_commit = Some(auto_commit), |c| {
            c.set_auto_commit(auto_commit)
        })
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.update_settings("set_read_only", |s| s.read_only = Some(read_only), |c| {
            c.set_read_only(read_only)
        })
    }

    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.update_settings("set_transaction_isolation", |s| s.isolation = Some(level), |c| {
            c.set_transaction_isolation(level)
        })
    }

    /// Commit every cached connection. All are attempted; failures are
    /// reported together.
    pub fn commit(&self) -> Result<()> {
        self.for_each_cached("commit", |c| c.commit())
    }

    /// Roll back every cached connection. All are attempted; failures are
    /// reported together.
    pub fn rollback(&self) -> Result<()> {
        self.for_each_cached("rollback", |c| c.rollback())
    }

    /// Close every cached connection and mark this one closed. The sticky
    /// write flag is reset. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.dml_seen = false;
            std::mem::take(&mut state.cache)
        };
        let mut failures = Vec::new();
        for cached in drained.into_values() {
            let closed = cached.handle.lock().close();
            if let Err(err) = closed {
                failures.push(tag(&cached.physical, err));
            }
        }
        report("close", failures)
    }

    fn update_settings(
        &self,
        operation: &'static str,
        record: impl FnOnce(&mut ConnectionSettings),
        apply: impl Fn(&mut dyn PhysicalConnection) -> Result<()>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ShardError::ConnectionClosed);
            }
            record(&mut state.settings);
        }
        self.for_each_cached(operation, apply)
    }

    fn for_each_cached(
        &self,
        operation: &'static str,
        action: impl Fn(&mut dyn PhysicalConnection) -> Result<()>,
    ) -> Result<()> {
        let handles: Vec<(String, SharedConnection)> = {
            let state = self.state.lock();
            state
                .cache
                .values()
                .map(|c| (c.physical.clone(), Arc::clone(&c.handle)))
                .collect()
        };
        let mut failures = Vec::new();
        for (physical, handle) in handles {
            let mut guard = handle.lock();
            if let Err(err) = action(&mut **guard) {
                failures.push(tag(&physical, err));
            }
        }
        report(operation, failures)
    }
}

impl std::fmt::Debug for ShardingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ShardingConnection")
            .field("cached", &state.cache.len())
            .field("settings", &state.settings)
            .field("dml_seen", &state.dml_seen)
            .field("closed", &state.closed)
            .finish()
    }
}

fn open(source: &dyn DataSource, settings: &ConnectionSettings) -> Result<SharedConnection> {
    let mut conn = source.connect()?;
    if let Err(err) = settings.apply(conn.as_mut()) {
        let _ = conn.close();
        return Err(tag(source.name(), err));
    }
    Ok(Arc::new(Mutex::new(conn)))
}

/// Attach the data-source name to errors that lack one.
fn tag(physical: &str, err: ShardError) -> ShardError {
    match err {
        ShardError::Physical { .. } => err,
        other => ShardError::physical(physical, other.to_string()),
    }
}

fn report(operation: &'static str, failures: Vec<ShardError>) -> Result<()> {
    if !failures.is_empty() {
        error!(
            target: "shardline.connection",
            operation,
            failures = failures.len(),
            "operation failed on some physical connections"
        );
    }
    ShardError::aggregate(operation, failures)
}
