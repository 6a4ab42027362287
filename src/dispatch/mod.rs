//! Dispatch runtime: runs subscription callbacks off the mutating thread.
//!
//! # Architecture
//!
//! - A fixed set of worker *lanes*, each a `std::thread` draining its own
//!   `mpsc` queue in FIFO order
//! - [`DispatchRuntime::submit`] routes a job to a lane by hashing its key
//!   (normally the subscription element), so events for one key run in the order
//!   they were emitted while unrelated elements run concurrently
//! - [`DispatchMode::Sequential`] is the one-lane case: every callback runs
//!   in emission order on a single worker
//! - A pending-job counter backs [`DispatchRuntime::quiesce`]
//!
//! Jobs never run on the thread that mutated the graph, so a callback may
//! itself mutate the graph and cause further dispatch without deadlocking.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::addr::Addr;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors specific to the dispatch runtime.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("dispatch runtime is shut down")]
    #[diagnostic(
        code(reactor::dispatch::shut_down),
        help(
            "The reactor was shut down or dropped. Events emitted after shutdown \
             are not delivered; create a new reactor to resume dispatch."
        )
    )]
    ShutDown,

    #[error("failed to spawn dispatch worker {index}")]
    #[diagnostic(
        code(reactor::dispatch::spawn),
        help("The OS refused to create a thread. Lower `dispatch.workers` or check process limits.")
    )]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How callbacks are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Several lanes; per-element order only.
    #[default]
    Parallel,
    /// One lane; global emission order.
    Sequential,
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => f.write_str("parallel"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

/// A unit of work handed to a lane.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Pending counter
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn increment(&self) {
        *self.count.lock().expect("pending lock poisoned") += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().expect("pending lock poisoned");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().expect("pending lock poisoned")
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let count = self.count.lock().expect("pending lock poisoned");
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |n| *n > 0)
            .expect("pending lock poisoned");
        *count == 0
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Lane-based callback executor.
pub struct DispatchRuntime {
    mode: DispatchMode,
    lanes: RwLock<Vec<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    pending: Arc<Pending>,
}

impl DispatchRuntime {
    /// Start the runtime. `workers` is ignored in sequential mode and
    /// clamped to at least one otherwise.
    pub fn new(mode: DispatchMode, workers: usize) -> DispatchResult<Self> {
        let lane_count = match mode {
            DispatchMode::Sequential => 1,
            DispatchMode::Parallel => workers.max(1),
        };
        let pending = Arc::new(Pending::default());

        let mut lanes = Vec::with_capacity(lane_count);
        let mut handles = Vec::with_capacity(lane_count);
        for index in 0..lane_count {
            let (tx, rx) = mpsc::channel::<Job>();
            let pending = Arc::clone(&pending);
            let handle = thread::Builder::new()
                .name(format!("reactor-lane-{index}"))
                .spawn(move || run_lane(index, rx, &pending))
                .map_err(|source| DispatchError::Spawn { index, source })?;
            lanes.push(tx);
            handles.push(handle);
        }

        let worker_ids = handles.iter().map(|h| h.thread().id()).collect();
        tracing::debug!(%mode, lanes = lane_count, "dispatch runtime started");
        Ok(Self {
            mode,
            lanes: RwLock::new(lanes),
            workers: Mutex::new(handles),
            worker_ids,
            pending,
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Number of lanes the runtime started with.
    pub fn lane_count(&self) -> usize {
        self.worker_ids.len()
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Queue `job` on the lane owning `key`.
    pub fn submit(&self, key: Addr, job: Job) -> DispatchResult<()> {
        let lanes = self.lanes.read().expect("lane lock poisoned");
        if lanes.is_empty() {
            return Err(DispatchError::ShutDown);
        }
        let lane = lane_for(key, lanes.len());
        self.pending.increment();
        if lanes[lane].send(job).is_err() {
            self.pending.decrement();
            return Err(DispatchError::ShutDown);
        }
        Ok(())
    }

    /// Block until every submitted job has finished, or `timeout` elapses.
    ///
    /// Returns `true` if the runtime went idle. Jobs that submit further jobs
    /// keep the runtime busy until the cascade settles.
    pub fn quiesce(&self, timeout: Duration) -> bool {
        self.pending.wait_idle(timeout)
    }

    /// Whether [`DispatchRuntime::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.lanes.read().expect("lane lock poisoned").is_empty()
    }

    /// Stop accepting jobs, let the lanes drain their queues, and join them.
    ///
    /// Idempotent. When called from a lane thread that lane is not joined.
    pub fn shutdown(&self) {
        let senders = std::mem::take(&mut *self.lanes.write().expect("lane lock poisoned"));
        if senders.is_empty() {
            return;
        }
        drop(senders);

        let started = Instant::now();
        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.workers.lock().expect("worker lock poisoned"));
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("dispatch lane panicked outside a job");
            }
        }
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch runtime shut down"
        );
    }
}

impl Drop for DispatchRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("mode", &self.mode)
            .field("lanes", &self.lane_count())
            .field("pending", &self.pending())
            .finish()
    }
}

fn lane_for(key: Addr, lanes: usize) -> usize {
    // Fibonacci hashing spreads sequentially allocated addresses.
    let mixed = key.get().wrapping_mul(0x9E37_79B9_7F4A_7C15);
    ((mixed >> 32) as usize) % lanes
}

fn run_lane(index: usize, rx: mpsc::Receiver<Job>, pending: &Pending) {
    while let Ok(job) = rx.recv() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(lane = index, %message, "dispatch job panicked");
        }
        pending.decrement();
    }
    tracing::trace!(lane = index, "dispatch lane exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn addr(raw: u64) -> Addr {
        Addr::new(raw).unwrap()
    }

    #[test]
    fn sequential_preserves_submission_order() {
        let runtime = DispatchRuntime::new(DispatchMode::Sequential, 8).unwrap();
        assert_eq!(runtime.lane_count(), 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100u64 {
            let seen = Arc::clone(&seen);
            runtime
                .submit(addr(i + 1), Box::new(move || seen.lock().unwrap().push(i)))
                .unwrap();
        }
        assert!(runtime.quiesce(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn same_key_keeps_order_in_parallel_mode() {
        let runtime = DispatchRuntime::new(DispatchMode::Parallel, 4).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..200u64 {
            let seen = Arc::clone(&seen);
            runtime
                .submit(addr(42), Box::new(move || seen.lock().unwrap().push(i)))
                .unwrap();
        }
        assert!(runtime.quiesce(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_does_not_kill_lane() {
        let runtime = DispatchRuntime::new(DispatchMode::Sequential, 1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        runtime
            .submit(addr(1), Box::new(|| panic!("boom")))
            .unwrap();
        let r = Arc::clone(&ran);
        runtime
            .submit(addr(1), Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(runtime.quiesce(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_drains_then_rejects() {
        let runtime = DispatchRuntime::new(DispatchMode::Parallel, 2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..20u64 {
            let r = Arc::clone(&ran);
            runtime
                .submit(addr(i + 1), Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        runtime.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 20);
        assert!(runtime.is_shut_down());
        assert!(matches!(
            runtime.submit(addr(1), Box::new(|| {})),
            Err(DispatchError::ShutDown)
        ));
        runtime.shutdown();
    }

    #[test]
    fn lane_assignment_is_stable_and_in_range() {
        for raw in 1..1000u64 {
            let lane = lane_for(addr(raw), 7);
            assert!(lane < 7);
            assert_eq!(lane, lane_for(addr(raw), 7));
        }
    }
}
