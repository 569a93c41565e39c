//! Master/slave groups and read load balancing.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use shardline_error::{Result, ShardError};
use shardline_types::SqlKind;

use crate::datasource::DataSource;

/// How reads are spread over slaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
}

/// Declarative master/slave group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterSlaveConfig {
    pub name: String,
    pub master: String,
    /// Comma-separated slave data-source names.
    #[serde(default)]
    pub slaves: String,
    #[serde(default)]
    pub load_balance: LoadBalanceStrategy,
}

impl MasterSlaveConfig {
    /// Slave names with whitespace and empty entries removed.
    #[must_use]
    pub fn slave_names(&self) -> Vec<&str> {
        self.slaves
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Member of a group a statement was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Master,
    Slave,
}

/// One writable master plus read replicas.
pub struct MasterSlaveDataSource {
    name: String,
    master: Arc<dyn DataSource>,
    slaves: Vec<Arc<dyn DataSource>>,
    strategy: LoadBalanceStrategy,
    next: AtomicUsize,
}

impl MasterSlaveDataSource {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        master: Arc<dyn DataSource>,
        slaves: Vec<Arc<dyn DataSource>>,
        strategy: LoadBalanceStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            master,
            slaves,
            strategy,
            next: AtomicUsize::new(0),
        }
    }

    /// Build from `config`, resolving member names with `lookup`.
    pub fn from_config<F>(config: &MasterSlaveConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<Arc<dyn DataSource>>,
    {
        let resolve = |name: &str| {
            lookup(name).ok_or_else(|| ShardError::NoDataSource {
                name: name.to_owned(),
            })
        };
        let master = resolve(config.master.trim())?;
        let slaves = config
            .slave_names()
            .into_iter()
            .map(resolve)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            config.name.clone(),
            master,
            slaves,
            config.load_balance,
        ))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn master(&self) -> &Arc<dyn DataSource> {
        &self.master
    }

    #[must_use]
    pub fn slaves(&self) -> &[Arc<dyn DataSource>] {
        &self.slaves
    }

    /// Role serving `kind`. Writes, reads after a write in the same
    /// session, and groups without slaves use the master.
    #[must_use]
    pub fn role_for(&self, kind: SqlKind, dml_seen: bool) -> Role {
        if kind.is_dml() || dml_seen || self.slaves.is_empty() {
            Role::Master
        } else {
            Role::Slave
        }
    }

    /// Member for `role`; slaves are chosen by the load-balance strategy.
    #[must_use]
    pub fn select(&self, role: Role) -> &Arc<dyn DataSource> {
        if role == Role::Master || self.slaves.is_empty() {
            return &self.master;
        }
        let index = match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.slaves.len()
            }
            LoadBalanceStrategy::Random => rand::thread_rng().gen_range(0..self.slaves.len()),
        };
        &self.slaves[index]
    }

    /// Master first, then slaves in configured order.
    pub fn members(&self) -> impl Iterator<Item = &Arc<dyn DataSource>> {
        std::iter::once(&self.master).chain(self.slaves.iter())
    }
}

impl fmt::Debug for MasterSlaveDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSlaveDataSource")
            .field("name", &self.name)
            .field("master", &self.master.name())
            .field(
                "slaves",
                &self.slaves.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::PhysicalConnection;
    use std::collections::BTreeMap;

    struct Named(String);

    impl DataSource for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn connect(&self) -> Result<Box<dyn PhysicalConnection>> {
            Err(ShardError::unsupported("connect"))
        }
    }

    fn named(name: &str) -> Arc<dyn DataSource> {
        Arc::new(Named(name.to_owned()))
    }

    fn group(strategy: LoadBalanceStrategy) -> MasterSlaveDataSource {
        MasterSlaveDataSource::new(
            "ms",
            named("master"),
            vec![named("slave_0"), named("slave_1")],
            strategy,
        )
    }

    #[test]
    fn test_writes_and_sticky_reads_use_master() {
        let ms = group(LoadBalanceStrategy::RoundRobin);
        assert_eq!(ms.role_for(SqlKind::Insert, false), Role::Master);
        assert_eq!(ms.role_for(SqlKind::Ddl, false), Role::Master);
        assert_eq!(ms.role_for(SqlKind::Select, true), Role::Master);
        assert_eq!(ms.role_for(SqlKind::Select, false), Role::Slave);
        assert_eq!(ms.select(Role::Master).name(), "master");
    }

    #[test]
    fn test_round_robin_cycles() {
        let ms = group(LoadBalanceStrategy::RoundRobin);
        let picks: Vec<&str> = (0..4).map(|_| ms.select(Role::Slave).name()).collect();
        assert_eq!(picks, vec!["slave_0", "slave_1", "slave_0", "slave_1"]);
    }

    #[test]
    fn test_random_stays_within_slaves() {
        let ms = group(LoadBalanceStrategy::Random);
        for _ in 0..50 {
            assert!(ms.select(Role::Slave).name().starts_with("slave_"));
        }
    }

    #[test]
    fn test_no_slaves_reads_from_master() {
        let ms =
            MasterSlaveDataSource::new("ms", named("m"), Vec::new(), LoadBalanceStrategy::Random);
        assert_eq!(ms.role_for(SqlKind::Select, false), Role::Master);
        assert_eq!(ms.select(Role::Slave).name(), "m");
    }

    #[test]
    fn test_from_config() {
        let config: MasterSlaveConfig = serde_json::from_str(
            r#"{"name": "ms_0", "master": "m0", "slaves": " s0, s1 ,"}"#,
        )
        .unwrap();
        assert_eq!(config.load_balance, LoadBalanceStrategy::RoundRobin);
        assert_eq!(config.slave_names(), vec!["s0", "s1"]);

        let mut known: BTreeMap<&str, Arc<dyn DataSource>> = BTreeMap::new();
        for name in ["m0", "s0", "s1"] {
            known.insert(name, named(name));
        }
        let ms = MasterSlaveDataSource::from_config(&config, |n| known.get(n).cloned()).unwrap();
        assert_eq!(ms.name(), "ms_0");
        assert_eq!(ms.members().map(|m| m.name()).collect::<Vec<_>>(), vec!["m0", "s0", "s1"]);

        known.remove("s1");
        let err =
            MasterSlaveDataSource::from_config(&config, |n| known.get(n).cloned()).unwrap_err();
        assert!(matches!(err, ShardError::NoDataSource { ref name } if name == "s1"));
    }
}
