//! Bounded worker pool backing the execution engine.
//!
//! A fixed set of named threads drains a FIFO job queue. Shutdown stops
//! admission, discards queued jobs that have not started, and waits a
//! bounded grace period for running jobs.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use shardline_error::{Result, ShardError};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    accepting: bool,
    running: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled when work arrives or the pool stops.
    work_cv: Condvar,
    /// Signalled when the last running job finishes.
    idle_cv: Condvar,
}

/// Fixed-size thread pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                accepting: true,
                running: 0,
            }),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("shardline-exec-{index}"))
                .spawn(move || worker_loop(&worker_shared))
                .map_err(|e| ShardError::internal(format!("failed to spawn worker {index}: {e}")))?;
            handles.push(handle);
        }
        info!(target: "shardline.execute", workers = size, "worker pool started");
        Ok(Self {
            shared,
            handles: Mutex::new(handles),
            size,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        !self.shared.state.lock().accepting
    }

    /// Queue `job`. Fails once shutdown has begun.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return Err(ShardError::ExecutorShutdown);
            }
            state.queue.push_back(Box::new(job));
        }
        self.shared.work_cv.notify_one();
        Ok(())
    }

    /// Stop accepting work, drop queued jobs, and wait up to `grace` for
    /// running jobs to finish.
    ///
    /// Dropped jobs never run; anything they own is released. Calling this
    /// again after a successful shutdown is a no-op.
    pub fn shutdown(&self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;
        let mut state = self.shared.state.lock();
        let was_accepting = state.accepting;
        state.accepting = false;
        let discarded = std::mem::take(&mut state.queue);
        self.shared.work_cv.notify_all();

        while state.running > 0 {
            let timed_out = self.shared.idle_cv.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.running > 0 {
                let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
                error!(
                    target: "shardline.execute",
                    running = state.running,
                    grace_ms,
                    "worker pool did not terminate within grace period"
                );
                return Err(ShardError::ShutdownTimeout { grace_ms });
            }
        }
        drop(state);

        if !discarded.is_empty() {
            debug!(
                target: "shardline.execute",
                cancelled = discarded.len(),
                "discarded queued jobs"
            );
        }
        drop(discarded);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!(target: "shardline.execute", "worker thread panicked");
            }
        }
        if was_accepting {
            info!(target: "shardline.execute", workers = self.size, "worker pool stopped");
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown(Duration::from_secs(5)) {
            warn!(
                target: "shardline.execute",
                error = %err,
                "worker pool shutdown during drop failed"
            );
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.running += 1;
                    break job;
                }
                if !state.accepting {
                    return;
                }
                shared.work_cv.wait(&mut state);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(target: "shardline.execute", "job panicked; worker continues");
        }

        let mut state = shared.state.lock();
        state.running -= 1;
        if state.running == 0 {
            shared.idle_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..20 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(pool.size(), 3);
        pool.shutdown(Duration::from_secs(1)).unwrap();
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown(Duration::from_millis(100)).unwrap();
        assert!(matches!(pool.submit(|| {}), Err(ShardError::ExecutorShutdown)));
        pool.shutdown(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_shutdown_discards_queued_jobs() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (queued_tx, queued_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            queued_tx.send(()).unwrap();
        })
        .unwrap();

        let watcher = Arc::clone(&pool);
        let releaser = thread::spawn(move || {
            while !watcher.is_shutdown() {
                thread::sleep(Duration::from_millis(1));
            }
            release_tx.send(()).unwrap();
        });
        pool.shutdown(Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
        // The queued job was dropped with its sender.
        assert!(queued_rx.recv().is_err());
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_job() {
        let pool = WorkerPool::new(1).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let err = pool.shutdown(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ShardError::ShutdownTimeout { grace_ms: 20 }));
        assert!(err.is_fatal());
        release_tx.send(()).unwrap();
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
