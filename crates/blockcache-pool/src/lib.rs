//! Fixed-size worker pool
//!
//! A [`WorkerPool`] runs a constant number of OS threads. Each thread calls
//! the same unit of work ([`Work`]) over and over, passing its worker index,
//! until the pool's shared stop signal is raised.
//!
//! Lifecycle:
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopping --join()/drop--> Joined
//! ```
//!
//! Shutdown is cooperative. A worker notices the stop signal between units
//! of work, so shutdown latency is bounded by the duration of one unit. The
//! pool joins every worker before it is dropped.
//!
//! ## Faults
//!
//! A unit of work that panics is caught. Under [`FaultPolicy::Continue`]
//! (the default) the iteration is treated as a no-op and the worker keeps
//! going; under [`FaultPolicy::Terminate`] the worker marks itself stopped
//! and exits. In both cases [`WorkerPool::stopped`] eventually reports true.

mod pool;

pub use pool::{FaultPolicy, PoolError, PoolResult, PoolState, Step, StopHandle, Work, WorkerPool};

/// Default time an idle worker waits before running its unit again.
pub const DEFAULT_IDLE_WAIT_MS: u64 = 1;
