//! Concurrent execution of routed statement units.
//!
//! The first unit runs on the caller's thread while the rest run on the
//! worker pool. Results come back in unit order regardless of completion
//! order.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardline_error::{Result, ShardError};
use shardline_observability::{ExecutionEvent, ExecutionObserver, NoOpObserver};
use shardline_router::ExecutionUnit;
use shardline_types::ShardValue;
use tracing::{debug, warn};

use crate::datasource::{PhysicalConnection, SharedConnection};
use crate::pool::WorkerPool;

// ---------------------------------------------------------------------------
// Context and configuration
// ---------------------------------------------------------------------------

/// Per-execution settings visible to every unit.
///
/// The string map is read-only once execution starts; each worker sees the
/// caller's values.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Propagate the first unit error to the caller. When unset, failures
    /// are logged and the unit's slot is left empty.
    pub fail_fast: bool,
    data_map: Arc<BTreeMap<String, String>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            fail_fast: true,
            data_map: Arc::new(BTreeMap::new()),
        }
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new(fail_fast: bool) -> Self {
        Self {
            fail_fast,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.data_map).insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.data_map.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.data_map
    }
}

fn default_executor_size() -> usize {
    thread_count().clamp(1, 32)
}

fn thread_count() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Worker pool sizing and shutdown behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub executor_size: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executor_size: default_executor_size(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statement units
// ---------------------------------------------------------------------------

/// One SQL statement bound to the physical connection that runs it.
///
/// A plain statement carries one parameter set. A batch unit carries one
/// set per batched call, with `batch_indexes[i]` naming the logical batch
/// entry that produced `parameter_sets[i]`.
pub struct StatementUnit {
    pub data_source: String,
    pub sql: String,
    pub parameter_sets: Vec<Vec<ShardValue>>,
    pub batch_indexes: Vec<usize>,
    pub connection: SharedConnection,
}

impl StatementUnit {
    #[must_use]
    pub fn from_unit(unit: ExecutionUnit, connection: SharedConnection) -> Self {
        Self {
            data_source: unit.data_source,
            sql: unit.sql,
            parameter_sets: vec![unit.parameters],
            batch_indexes: Vec::new(),
            connection,
        }
    }

    /// Parameters of the first set, or none.
    #[must_use]
    pub fn parameters(&self) -> &[ShardValue] {
        self.parameter_sets.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Debug for StatementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementUnit")
            .field("data_source", &self.data_source)
            .field("sql", &self.sql)
            .field("parameter_sets", &self.parameter_sets)
            .field("batch_indexes", &self.batch_indexes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs statement units concurrently and reports lifecycle events.
pub struct ExecutorEngine {
    pool: WorkerPool,
    observer: Arc<dyn ExecutionObserver>,
    config: ExecutorConfig,
}

impl ExecutorEngine {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new(config.executor_size)?,
            observer: Arc::new(NoOpObserver),
            config,
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Stop the pool, waiting up to the configured grace period.
    pub fn shutdown(&self) -> Result<()> {
        self.pool
            .shutdown(Duration::from_millis(self.config.shutdown_grace_ms))
    }

    /// Run `callback` once per unit and return the outcomes in unit order.
    ///
    /// Every unit runs to completion before this returns. With
    /// `fail_fast` set, or when any unit fails fatally, the first error in
    /// unit order is returned. Otherwise failed units yield `None`.
    pub fn execute<T, F>(
        &self,
        context: &ExecutionContext,
        units: Vec<StatementUnit>,
        callback: F,
    ) -> Result<Vec<Option<T>>>
    where
        T: Send + 'static,
        F: Fn(&ExecutionContext, &StatementUnit, &mut dyn PhysicalConnection) -> Result<T>
            + Send
            + Sync
            + 'static,
    {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let total = units.len();
        let context = Arc::new(context.clone());
        let callback = Arc::new(callback);
        let (tx, rx) = mpsc::channel::<(usize, Result<T>)>();

        let mut units = units.into_iter();
        let Some(first) = units.next() else {
            return Ok(Vec::new());
        };
        for (offset, unit) in units.enumerate() {
            let index = offset + 1;
            let tx = tx.clone();
            let context = Arc::clone(&context);
            let callback = Arc::clone(&callback);
            let observer = Arc::clone(&self.observer);
            self.pool.submit(move || {
                let outcome = run_unit(observer.as_ref(), &context, &unit, callback.as_ref());
                let _ = tx.send((index, outcome));
            })?;
        }
        debug!(
            target: "shardline.execute",
            units = total,
            fail_fast = context.fail_fast,
            "dispatched statement units"
        );

        let first_outcome = run_unit(self.observer.as_ref(), &context, &first, callback.as_ref());
        drop(tx);

        let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        slots[0] = Some(first_outcome);
        // Ends once every job has sent or been discarded.
        for (index, outcome) in rx {
            slots[index] = Some(outcome);
        }

        let mut results = Vec::with_capacity(total);
        let mut first_error = None;
        for (index, slot) in slots.into_iter().enumerate() {
            match slot.unwrap_or(Err(ShardError::Cancelled)) {
                Ok(value) => results.push(Some(value)),
                Err(err) => {
                    if context.fail_fast || err.is_fatal() {
                        first_error.get_or_insert(err);
                    } else {
                        warn!(
                            target: "shardline.execute",
                            unit = index,
                            error = %err,
                            "statement unit failed; continuing"
                        );
                    }
                    results.push(None);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

impl fmt::Debug for ExecutorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorEngine")
            .field("config", &self.config)
            .field("shutdown", &self.pool.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn run_unit<T, F>(
    observer: &dyn ExecutionObserver,
    context: &ExecutionContext,
    unit: &StatementUnit,
    callback: &F,
) -> Result<T>
where
    F: Fn(&ExecutionContext, &StatementUnit, &mut dyn PhysicalConnection) -> Result<T>,
{
    let events: Vec<ExecutionEvent> = if unit.parameter_sets.is_empty() {
        vec![ExecutionEvent::before(&unit.data_source, &unit.sql, &[])]
    } else {
        unit.parameter_sets
            .iter()
            .map(|params| ExecutionEvent::before(&unit.data_source, &unit.sql, params))
            .collect()
    };
    for event in &events {
        observer.on_event(event);
    }

    let outcome = {
        let mut conn = unit.connection.lock();
        callback(context, unit, &mut **conn)
    };

    match &outcome {
        Ok(_) => {
            for event in &events {
                observer.on_event(&event.succeeded());
            }
        }
        Err(err) => {
            for event in &events {
                observer.on_event(&event.failed(err));
            }
        }
    }
    outcome
}
