//! Worker pool mechanics.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::DEFAULT_IDLE_WAIT_MS;

/// Pool result type
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors from pool lifecycle operations
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("cannot {operation} a pool in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PoolState,
    },

    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, no workers running
    Created,
    /// Workers active
    Running,
    /// Stop signal raised, workers draining
    Stopping,
    /// All workers finished and collected
    Joined,
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Work was done; run the next unit immediately.
    Busy,
    /// Nothing to do; wait briefly (or until stopped) before the next unit.
    Idle,
}

/// What a worker does when its unit of work panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log the panic, count it, and keep looping.
    #[default]
    Continue,
    /// Log the panic, mark the worker stopped, and exit its loop.
    Terminate,
}

/// A unit of work run repeatedly by every worker.
///
/// Implemented for any `Fn(usize) -> Step` closure; the argument is the
/// worker index in `0..count`.
pub trait Work: Send + Sync + 'static {
    fn work(&self, worker: usize) -> Step;
}

impl<F> Work for F
where
    F: Fn(usize) -> Step + Send + Sync + 'static,
{
    fn work(&self, worker: usize) -> Step {
        self(worker)
    }
}

/// State shared between the pool, its workers and any stop handles.
#[derive(Debug)]
struct Shared {
    done: AtomicBool,
    stopped: Vec<AtomicBool>,
    iterations: Vec<AtomicU64>,
    faults: AtomicU64,
    threads: Mutex<Vec<Thread>>,
}

impl Shared {
    fn new(count: usize) -> Self {
        Self {
            done: AtomicBool::new(false),
            stopped: (0..count).map(|_| AtomicBool::new(false)).collect(),
            iterations: (0..count).map(|_| AtomicU64::new(0)).collect(),
            faults: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Raise the stop signal and wake idle workers.
    fn signal_done(&self) {
        self.done.store(true, Ordering::Release);
        if let Ok(threads) = self.threads.lock() {
            for thread in threads.iter() {
                thread.unpark();
            }
        }
    }
}

/// Cloneable handle that can stop a pool from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Raise the stop signal. Never blocks.
    pub fn stop(&self) {
        self.shared.signal_done();
    }

    /// Check if the stop signal has been raised
    pub fn is_stopping(&self) -> bool {
        self.shared.is_done()
    }
}

/// Marks a worker slot stopped however the worker loop exits.
struct StoppedGuard<'a> {
    shared: &'a Shared,
    worker: usize,
}

impl Drop for StoppedGuard<'_> {
    fn drop(&mut self) {
        self.shared.stopped[self.worker].store(true, Ordering::Release);
    }
}

/// A fixed collection of worker threads running the same unit of work.
pub struct WorkerPool {
    name: String,
    count: usize,
    work: Arc<dyn Work>,
    idle_wait: Duration,
    fault_policy: FaultPolicy,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    state: PoolState,
}

impl WorkerPool {
    /// Create an inert pool of `count` workers running `work`. No threads
    /// run until [`start`](Self::start).
    pub fn new<F>(count: usize, work: F) -> PoolResult<Self>
    where
        F: Fn(usize) -> Step + Send + Sync + 'static,
    {
        Self::from_work(count, work)
    }

    /// Like [`new`](Self::new), for a strategy value implementing [`Work`].
    pub fn from_work<W: Work>(count: usize, work: W) -> PoolResult<Self> {
        if count == 0 {
            return Err(PoolError::NoWorkers);
        }
        Ok(Self {
            name: "worker".to_string(),
            count,
            work: Arc::new(work),
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
            fault_policy: FaultPolicy::default(),
            shared: Arc::new(Shared::new(count)),
            handles: Vec::with_capacity(count),
            state: PoolState::Created,
        })
    }

    /// Set the thread name prefix (threads are named `<name>-<index>`).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set how long a worker waits after its unit returns [`Step::Idle`].
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Set what happens when a unit of work panics.
    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Number of workers.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Launch exactly `count` workers.
    ///
    /// Returns once the threads are spawned. If a spawn fails, workers
    /// already launched are stopped and joined before the error is returned.
    pub fn start(&mut self) -> PoolResult<()> {
        if self.state != PoolState::Created {
            return Err(PoolError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        for worker in 0..self.count {
            let shared = Arc::clone(&self.shared);
            let work = Arc::clone(&self.work);
            let idle_wait = self.idle_wait;
            let policy = self.fault_policy;

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, worker))
                .spawn(move || run_worker(worker, &shared, work.as_ref(), idle_wait, policy));

            match spawned {
                Ok(handle) => {
                    if let Ok(mut threads) = self.shared.threads.lock() {
                        threads.push(handle.thread().clone());
                    }
                    self.handles.push(handle);
                }
                Err(source) => {
                    error!(pool = %self.name, worker, error = %source, "failed to spawn worker");
                    for slot in &self.shared.stopped[worker..] {
                        slot.store(true, Ordering::Release);
                    }
                    self.state = PoolState::Stopping;
                    self.join();
                    return Err(PoolError::Spawn { worker, source });
                }
            }
        }

        self.state = PoolState::Running;
        info!(pool = %self.name, workers = self.count, "worker pool started");
        Ok(())
    }

    /// Request cooperative shutdown. Does not wait for workers to exit.
    pub fn stop(&mut self) {
        self.shared.signal_done();
        match self.state {
            PoolState::Running => {
                self.state = PoolState::Stopping;
                debug!(pool = %self.name, "worker pool stopping");
            }
            PoolState::Created => {
                // No worker ever ran; every slot counts as stopped.
                for slot in &self.shared.stopped {
                    slot.store(true, Ordering::Release);
                }
                self.state = PoolState::Joined;
            }
            PoolState::Stopping | PoolState::Joined => {}
        }
    }

    /// True iff every worker has left its loop. Never blocks.
    pub fn stopped(&self) -> bool {
        self.shared
            .stopped
            .iter()
            .all(|stopped| stopped.load(Ordering::Acquire))
    }

    /// Stop the pool (if not already stopping) and wait for every worker.
    ///
    /// Each worker handle is joined exactly once; later calls return
    /// immediately.
    pub fn join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(pool = %self.name, "worker thread exited by panic");
            }
        }
        if self.state != PoolState::Joined {
            info!(pool = %self.name, iterations = self.iterations(), "worker pool joined");
        }
        self.state = PoolState::Joined;
    }

    /// Get a handle that can stop this pool from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Completed units of work across all workers.
    pub fn iterations(&self) -> u64 {
        self.shared
            .iterations
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    /// Completed units of work for one worker.
    pub fn worker_iterations(&self, worker: usize) -> Option<u64> {
        self.shared
            .iterations
            .get(worker)
            .map(|count| count.load(Ordering::Relaxed))
    }

    /// Units of work that panicked.
    pub fn faults(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("state", &self.state)
            .finish()
    }
}

fn run_worker(
    worker: usize,
    shared: &Shared,
    work: &dyn Work,
    idle_wait: Duration,
    policy: FaultPolicy,
) {
    let _guard = StoppedGuard { shared, worker };

    while !shared.is_done() {
        match panic::catch_unwind(AssertUnwindSafe(|| work.work(worker))) {
            Ok(step) => {
                shared.iterations[worker].fetch_add(1, Ordering::Relaxed);
                if step == Step::Idle && !shared.is_done() {
                    thread::park_timeout(idle_wait);
                }
            }
            Err(payload) => {
                shared.faults.fetch_add(1, Ordering::Relaxed);
                error!(worker, panic = %panic_message(&*payload), "unit of work panicked");
                if policy == FaultPolicy::Terminate {
                    break;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
