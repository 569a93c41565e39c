//! Shard-resolution algorithms.
//!
//! An algorithm is a pure function from sharding-column values to a subset
//! of the available targets (data source names or physical table names).
//! Three built-ins cover the common layouts; [`ExpressionAlgorithm`] wraps a
//! user closure over all sharding columns at once, for tables that must be
//! split by several keys together.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use shardline_error::{Result, ShardError};
use shardline_types::ShardValue;

use crate::config::{AlgorithmConfig, RangeEntry};

/// Value(s) a WHERE clause pins a sharding column to.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValue {
    Single(ShardValue),
    List(Vec<ShardValue>),
    /// Inclusive on both ends.
    Range { lower: ShardValue, upper: ShardValue },
}

impl ShardingValue {
    /// Individual values, or `None` for a range.
    fn points(&self) -> Option<&[ShardValue]> {
        match self {
            Self::Single(v) => Some(std::slice::from_ref(v)),
            Self::List(vs) => Some(vs),
            Self::Range { .. } => None,
        }
    }
}

/// Lowercased column name -> pinned value.
pub type ShardingValues = BTreeMap<String, ShardingValue>;

/// Maps sharding-column values to targets.
pub trait ShardingAlgorithm: Send + Sync + fmt::Debug {
    /// Short name used in errors.
    fn name(&self) -> &'static str;

    /// Pick targets from `available` for `values`. Every sharding column of
    /// the owning strategy is present in `values`. The result keeps the
    /// order of `available`.
    fn resolve(
        &self,
        logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>>;
}

fn first_value<'a>(
    algorithm: &'static str,
    values: &'a ShardingValues,
) -> Result<&'a ShardingValue> {
    values
        .values()
        .next()
        .ok_or_else(|| ShardError::internal(format!("{algorithm} algorithm called without values")))
}

fn in_available_order(available: &[String], chosen: &BTreeSet<&str>) -> Vec<String> {
    available
        .iter()
        .filter(|t| chosen.contains(t.as_str()))
        .cloned()
        .collect()
}

fn sharding_integer(logic_name: &str, value: &ShardValue) -> Result<i64> {
    value
        .to_sharding_integer()
        .ok_or_else(|| ShardError::NoMatchingShard {
            logic_name: logic_name.to_owned(),
            value: value.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Modulo
// ---------------------------------------------------------------------------

/// Chooses the target whose name ends with `_{value mod n}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloAlgorithm {
    shard_count: Option<u32>,
}

impl ModuloAlgorithm {
    #[must_use]
    pub const fn new(shard_count: Option<u32>) -> Self {
        Self { shard_count }
    }

    fn target<'a>(available: &'a [String], logic_name: &str, remainder: i64) -> Result<&'a str> {
        let suffix = format!("_{remainder}");
        available
            .iter()
            .find(|t| t.ends_with(&suffix))
            .map(String::as_str)
            .ok_or_else(|| ShardError::NoMatchingShard {
                logic_name: logic_name.to_owned(),
                value: format!("remainder {remainder}"),
            })
    }
}

impl ShardingAlgorithm for ModuloAlgorithm {
    fn name(&self) -> &'static str {
        "modulo"
    }

    fn resolve(
        &self,
        logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>> {
        let n = match self.shard_count {
            Some(n) => i64::from(n),
            None => i64::try_from(available.len()).unwrap_or(i64::MAX),
        };
        if n <= 0 {
            return Err(ShardError::Config(format!(
                "modulo algorithm for '{logic_name}' has no shards"
            )));
        }
        let mut chosen = BTreeSet::new();
        match first_value(self.name(), values)? {
            ShardingValue::Range { lower, upper } => {
                let lo = sharding_integer(logic_name, lower)?;
                let hi = sharding_integer(logic_name, upper)?;
                if hi < lo {
                    return Ok(Vec::new());
                }
                if hi.saturating_sub(lo) >= n - 1 {
                    return Ok(available.to_vec());
                }
                for v in lo..=hi {
                    chosen.insert(Self::target(available, logic_name, v.rem_euclid(n))?);
                }
            }
            points => {
                for v in points.points().unwrap_or_default() {
                    let key = sharding_integer(logic_name, v)?;
                    chosen.insert(Self::target(available, logic_name, key.rem_euclid(n))?);
                }
            }
        }
        Ok(in_available_order(available, &chosen))
    }
}

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

/// Inclusive integer ranges, each owned by one target.
#[derive(Debug, Clone, Default)]
pub struct RangeAlgorithm {
    ranges: Vec<RangeEntry>,
}

impl RangeAlgorithm {
    #[must_use]
    pub fn new(ranges: Vec<RangeEntry>) -> Self {
        Self { ranges }
    }
}

impl ShardingAlgorithm for RangeAlgorithm {
    fn name(&self) -> &'static str {
        "range"
    }

    fn resolve(
        &self,
        logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>> {
        let mut chosen = BTreeSet::new();
        match first_value(self.name(), values)? {
            ShardingValue::Range { lower, upper } => {
                let lo = sharding_integer(logic_name, lower)?;
                let hi = sharding_integer(logic_name, upper)?;
                for entry in &self.ranges {
                    if entry.lower <= hi && lo <= entry.upper {
                        chosen.insert(entry.target.as_str());
                    }
                }
            }
            points => {
                for v in points.points().unwrap_or_default() {
                    let key = sharding_integer(logic_name, v)?;
                    let entry = self
                        .ranges
                        .iter()
                        .find(|e| e.lower <= key && key <= e.upper)
                        .ok_or_else(|| ShardError::NoMatchingShard {
                            logic_name: logic_name.to_owned(),
                            value: key.to_string(),
                        })?;
                    chosen.insert(entry.target.as_str());
                }
            }
        }
        Ok(in_available_order(available, &chosen))
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Exact key text -> target.
#[derive(Debug, Clone, Default)]
pub struct LookupAlgorithm {
    entries: BTreeMap<String, String>,
}

impl LookupAlgorithm {
    #[must_use]
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl ShardingAlgorithm for LookupAlgorithm {
    fn name(&self) -> &'static str {
        "lookup"
    }

    fn resolve(
        &self,
        logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>> {
        let Some(points) = first_value(self.name(), values)?.points() else {
            return Err(ShardError::UnsupportedCondition {
                algorithm: self.name(),
                condition: "BETWEEN",
            });
        };
        let mut chosen = BTreeSet::new();
        for v in points {
            let key = v.to_text();
            let target = self
                .entries
                .get(&key)
                .ok_or_else(|| ShardError::NoMatchingShard {
                    logic_name: logic_name.to_owned(),
                    value: key.clone(),
                })?;
            chosen.insert(target.as_str());
        }
        Ok(in_available_order(available, &chosen))
    }
}

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

/// User-supplied shard expression over all sharding columns of a strategy.
///
/// Receives one concrete value per column (lowercased names) and returns
/// the target name. Must be deterministic and side-effect free; it runs once
/// per key on every resolution.
pub type ShardingExpression =
    Arc<dyn Fn(&BTreeMap<String, ShardValue>) -> Result<String> + Send + Sync>;

/// Named expressions available to configuration.
#[derive(Clone, Default)]
pub struct ExpressionRegistry {
    expressions: BTreeMap<String, ShardingExpression>,
}

impl ExpressionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, expression: F)
    where
        F: Fn(&BTreeMap<String, ShardValue>) -> Result<String> + Send + Sync + 'static,
    {
        self.expressions.insert(name.into(), Arc::new(expression));
    }

    pub fn get(&self, name: &str) -> Result<ShardingExpression> {
        self.expressions
            .get(name)
            .cloned()
            .ok_or_else(|| ShardError::Config(format!("no sharding expression named '{name}'")))
    }
}

impl fmt::Debug for ExpressionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionRegistry")
            .field("names", &self.expressions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Multi-column algorithm backed by a [`ShardingExpression`].
pub struct ExpressionAlgorithm {
    name: String,
    expression: ShardingExpression,
}

impl ExpressionAlgorithm {
    #[must_use]
    pub fn new(name: impl Into<String>, expression: ShardingExpression) -> Self {
        Self {
            name: name.into(),
            expression,
        }
    }

    fn evaluate(&self, key: &BTreeMap<String, ShardValue>) -> Result<String> {
        (self.expression)(key)
    }
}

impl fmt::Debug for ExpressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionAlgorithm")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ShardingAlgorithm for ExpressionAlgorithm {
    fn name(&self) -> &'static str {
        "expression"
    }

    fn resolve(
        &self,
        _logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>> {
        // Cartesian product over every column's candidate values.
        let mut keys: Vec<BTreeMap<String, ShardValue>> = vec![BTreeMap::new()];
        for (column, value) in values {
            let Some(points) = value.points() else {
                return Err(ShardError::UnsupportedCondition {
                    algorithm: self.name(),
                    condition: "BETWEEN",
                });
            };
            let mut next = Vec::with_capacity(keys.len() * points.len());
            for key in &keys {
                for point in points {
                    let mut extended = key.clone();
                    extended.insert(column.clone(), point.clone());
                    next.push(extended);
                }
            }
            keys = next;
        }

        let mut chosen = BTreeSet::new();
        for key in &keys {
            let target = self.evaluate(key)?;
            let Some(known) = available.iter().find(|t| **t == target) else {
                return Err(ShardError::IllFormedExpression {
                    expression: self.name.clone(),
                    detail: format!(
                        "produced '{target}', expected one of [{}]",
                        available.join(", ")
                    ),
                });
            };
            chosen.insert(known.as_str());
        }
        Ok(in_available_order(available, &chosen))
    }
}

/// Instantiate the algorithm described by `config`.
pub fn build_algorithm(
    config: &AlgorithmConfig,
    registry: &ExpressionRegistry,
) -> Result<Arc<dyn ShardingAlgorithm>> {
    Ok(match config {
        AlgorithmConfig::Modulo { shard_count } => Arc::new(ModuloAlgorithm::new(*shard_count)),
        AlgorithmConfig::Range { ranges } => Arc::new(RangeAlgorithm::new(ranges.clone())),
        AlgorithmConfig::Lookup { entries } => Arc::new(LookupAlgorithm::new(entries.clone())),
        AlgorithmConfig::Expression { name } => {
            Arc::new(ExpressionAlgorithm::new(name.clone(), registry.get(name)?))
        }
    })
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Sharding columns plus algorithm.
#[derive(Debug, Clone)]
pub struct ShardingStrategy {
    columns: Vec<String>,
    algorithm: Arc<dyn ShardingAlgorithm>,
}

impl ShardingStrategy {
    #[must_use]
    pub fn new(columns: Vec<String>, algorithm: Arc<dyn ShardingAlgorithm>) -> Self {
        Self {
            columns: columns.into_iter().map(|c| c.to_ascii_lowercase()).collect(),
            algorithm,
        }
    }

    /// Lowercased sharding column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Narrow `available` using `values`.
    ///
    /// The algorithm runs only when every sharding column is pinned;
    /// otherwise every target is returned.
    pub fn shard(
        &self,
        logic_name: &str,
        available: &[String],
        values: &ShardingValues,
    ) -> Result<Vec<String>> {
        if self.columns.is_empty() || !self.columns.iter().all(|c| values.contains_key(c)) {
            return Ok(available.to_vec());
        }
        let own: ShardingValues = self
            .columns
            .iter()
            .filter_map(|c| values.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        self.algorithm.resolve(logic_name, available, &own)
    }
}
