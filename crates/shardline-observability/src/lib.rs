//! Execution events and observers.
//!
//! The execution engine reports every physical statement it runs as a pair
//! of [`ExecutionEvent`]s: a `Before` event, then a `Success` or `Failure`
//! event carrying the same id. Observers receive them synchronously on the
//! thread that ran the statement.
//!
//! # Design Principles
//!
//! - **Opt-in:** the default [`NoOpObserver`] does nothing and is inlined.
//! - **Fire-and-forget:** [`ExecutionObserver::on_event`] returns nothing
//!   and must not block on I/O. An observer can never fail a statement.
//! - **Informational only:** the engine never reads events back.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardline_types::ShardValue;

// ---------------------------------------------------------------------------
// ExecutionEvent
// ---------------------------------------------------------------------------

/// Phase of one physical statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Before,
    Success,
    Failure,
}

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// One notification about a physical statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Shared by a `Before` event and its outcome.
    pub id: u64,
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<ShardValue>,
    pub status: EventStatus,
    /// Error text of a `Failure` event.
    pub error: Option<String>,
    /// Wall-clock nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl ExecutionEvent {
    /// A `Before` event with a fresh id.
    #[must_use]
    pub fn before(data_source: &str, sql: &str, parameters: &[ShardValue]) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            data_source: data_source.to_owned(),
            sql: sql.to_owned(),
            parameters: parameters.to_vec(),
            status: EventStatus::Before,
            error: None,
            timestamp_ns: unix_nanos(),
        }
    }

    /// The `Success` outcome of this event.
    #[must_use]
    pub fn succeeded(&self) -> Self {
        Self {
            status: EventStatus::Success,
            error: None,
            timestamp_ns: unix_nanos(),
            ..self.clone()
        }
    }

    /// The `Failure` outcome of this event.
    #[must_use]
    pub fn failed(&self, error: &dyn fmt::Display) -> Self {
        Self {
            status: EventStatus::Failure,
            error: Some(error.to_string()),
            timestamp_ns: unix_nanos(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionObserver
// ---------------------------------------------------------------------------

/// Receives execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Default observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl ExecutionObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &ExecutionEvent) {}
}

/// Forwards events to `tracing` under the `shardline.execute` target.
///
/// `Before` is TRACE, `Success` is DEBUG, `Failure` is WARN.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event.status {
            EventStatus::Before => tracing::trace!(
                target: "shardline.execute",
                id = event.id,
                data_source = %event.data_source,
                sql = %event.sql,
                parameters = event.parameters.len(),
                "executing"
            ),
            EventStatus::Success => tracing::debug!(
                target: "shardline.execute",
                id = event.id,
                data_source = %event.data_source,
                "executed"
            ),
            EventStatus::Failure => tracing::warn!(
                target: "shardline.execute",
                id = event.id,
                data_source = %event.data_source,
                sql = %event.sql,
                error = event.error.as_deref().unwrap_or(""),
                "execution failed"
            ),
        }
    }
}

/// Delivers each event to several observers in order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl ObserverSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ExecutionObserver for ObserverSet {
    fn on_event(&self, event: &ExecutionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionEventLog
// ---------------------------------------------------------------------------

/// Fixed-capacity log of recent events; the oldest is overwritten when
/// full.
pub struct ExecutionEventLog {
    events: Mutex<RingBuf>,
}

struct RingBuf {
    buf: Vec<ExecutionEvent>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl RingBuf {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: ExecutionEvent) {
        if self.capacity == 0 {
            return;
        }
        let idx = (self.head + self.len) % self.capacity;
        if self.buf.len() < self.capacity {
            self.buf.push(event);
        } else {
            self.buf[idx] = event;
        }
        if self.len == self.capacity {
            self.head = (self.head + 1) % self.capacity;
        } else {
            self.len += 1;
        }
    }

    fn ordered(&self) -> Vec<ExecutionEvent> {
        (0..self.len)
            .map(|i| self.buf[(self.head + i) % self.capacity].clone())
            .collect()
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.len = 0;
    }
}

impl ExecutionEventLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(RingBuf::new(capacity)),
        }
    }

    pub fn push(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }

    /// Stored events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.lock().ordered()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.lock().capacity
    }
}

impl ExecutionObserver for ExecutionEventLog {
    fn on_event(&self, event: &ExecutionEvent) {
        self.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// ExecutionMetrics
// ---------------------------------------------------------------------------

/// Event counters. Counters are atomics; the per-data-source failure map
/// sits behind a mutex.
pub struct ExecutionMetrics {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    failures_by_source: Mutex<HashMap<String, u64>>,
    created_at: Instant,
}

impl ExecutionMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            failures_by_source: Mutex::new(HashMap::new()),
            created_at: Instant::now(),
        }
    }

    pub fn record(&self, event: &ExecutionEvent) {
        match event.status {
            EventStatus::Before => {
                self.started.fetch_add(1, Ordering::Relaxed);
            }
            EventStatus::Success => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            EventStatus::Failure => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                *self
                    .failures_by_source
                    .lock()
                    .entry(event.data_source.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    pub fn reset(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.failures_by_source.lock().clear();
    }

    /// Statements started but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        let started = self.started.load(Ordering::Relaxed);
        let finished =
            self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        started.saturating_sub(finished)
    }

    /// Data sources with the most failures, descending; ties by name.
    #[must_use]
    pub fn top_failing_sources(&self, n: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = {
            let map = self.failures_by_source.lock();
            map.iter().map(|(k, &v)| (k.clone(), v)).collect()
        };
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    #[must_use]
    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        ExecutionMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            elapsed_secs: self.created_at.elapsed().as_secs_f64(),
            top_failing_sources: self.top_failing_sources(10),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`ExecutionMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetricsSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub elapsed_secs: f64,
    pub top_failing_sources: Vec<(String, u64)>,
}

// ---------------------------------------------------------------------------
// MetricsObserver
// ---------------------------------------------------------------------------

/// Records every event into [`ExecutionMetrics`] and an
/// [`ExecutionEventLog`].
pub struct MetricsObserver {
    metrics: ExecutionMetrics,
    log: ExecutionEventLog,
}

impl MetricsObserver {
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            metrics: ExecutionMetrics::new(),
            log: ExecutionEventLog::new(log_capacity),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn log(&self) -> &ExecutionEventLog {
        &self.log
    }

    pub fn reset(&self) {
        self.metrics.reset();
        self.log.clear();
    }
}

impl ExecutionObserver for MetricsObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        self.metrics.record(event);
        self.log.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn before(ds: &str) -> ExecutionEvent {
        ExecutionEvent::before(ds, "SELECT 1", &[ShardValue::Integer(1)])
    }

    #[test]
    fn noop_observer_accepts_events() {
        NoOpObserver.on_event(&before("ds_0"));
    }

    #[test]
    fn outcome_events_share_id() {
        let start = before("ds_0");
        let ok = start.succeeded();
        let err = start.failed(&"timeout");
        assert_eq!(start.status, EventStatus::Before);
        assert_eq!(ok.id, start.id);
        assert_eq!(ok.status, EventStatus::Success);
        assert_eq!(err.id, start.id);
        assert_eq!(err.error.as_deref(), Some("timeout"));
        assert!(ok.timestamp_ns >= start.timestamp_ns);
        assert_ne!(before("ds_0").id, start.id);
    }

    #[test]
    fn ring_buffer_wraps_on_overflow() {
        let log = ExecutionEventLog::new(2);
        log.push(before("ds_0"));
        log.push(before("ds_1"));
        log.push(before("ds_2"));
        assert_eq!(log.len(), 2);
        let names: Vec<String> = log.snapshot().into_iter().map(|e| e.data_source).collect();
        assert_eq!(names, vec!["ds_1", "ds_2"]);
    }

    #[test]
    fn ring_buffer_zero_capacity_and_clear() {
        let log = ExecutionEventLog::new(0);
        log.push(before("ds_0"));
        assert!(log.is_empty());

        let log = ExecutionEventLog::new(4);
        log.on_event(&before("ds_0"));
        log.clear();
        assert!(log.snapshot().is_empty());
        assert_eq!(log.capacity(), 4);
    }

    #[test]
    fn metrics_count_phases_and_failing_sources() {
        let m = ExecutionMetrics::new();
        for ds in ["ds_0", "ds_1", "ds_1", "ds_2"] {
            let start = before(ds);
            m.record(&start);
            if ds == "ds_0" {
                m.record(&start.succeeded());
            } else {
                m.record(&start.failed(&"boom"));
            }
        }
        m.record(&before("ds_3"));
        let snap = m.snapshot();
        assert_eq!(snap.started, 5);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 3);
        assert_eq!(snap.in_flight, 1);
        assert_eq!(
            snap.top_failing_sources,
            vec![("ds_1".to_owned(), 2), ("ds_2".to_owned(), 1)]
        );
        m.reset();
        assert_eq!(m.snapshot().started, 0);
    }

    #[test]
    fn metrics_observer_records_both() {
        let obs = MetricsObserver::new(8);
        let start = before("ds_0");
        obs.on_event(&start);
        obs.on_event(&start.succeeded());
        assert_eq!(obs.metrics().succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(obs.log().len(), 2);
        obs.reset();
        assert!(obs.log().is_empty());
    }

    #[test]
    fn observer_set_fans_out() {
        let a = Arc::new(ExecutionEventLog::new(4));
        let b = Arc::new(MetricsObserver::new(4));
        let mut set = ObserverSet::new();
        set.push(a.clone());
        set.push(b.clone());
        set.push(Arc::new(TracingObserver));
        set.on_event(&before("ds_0"));
        assert_eq!(set.len(), 3);
        assert_eq!(a.len(), 1);
        assert_eq!(b.metrics().started.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_and_event_serialize() {
        let m = ExecutionMetrics::new();
        m.record(&before("ds_0"));
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"started\":1"));

        let event = before("ds_0").failed(&"lost");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"failure\""));
        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
