//! Cache warm-up
//!
//! Pulls every block of a source through a [`BlockCache`] using a
//! [`WorkerPool`]. Workers claim block indices from a shared cursor, so no
//! two workers ever load the same block. Once the cursor passes the last
//! block the workers go idle and the run ends when every claimed block has
//! finished (or a stop is requested).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blockcache_archive::BufferArray;
use blockcache_pool::{PoolError, Step, StopHandle, WorkerPool};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{BlockCache, CacheStats};
use crate::source::BlockSource;

/// How often the driving thread checks for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Warm result type
pub type WarmResult<T> = Result<T, WarmError>;

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("destination needs at least one stream")]
    NoStreams,
}

/// Outcome of a warm-up run.
#[derive(Debug, Clone, Serialize)]
pub struct WarmSummary {
    /// Blocks in the source
    pub blocks: u32,
    /// Blocks loaded successfully
    pub loaded: u32,
    /// Blocks whose source load failed
    pub failed: u32,
    /// Blocks whose load panicked
    pub panicked: u32,
    /// Cached records read back as deferred faults
    pub faulted_records: u64,
    /// True if the run was stopped before every block finished
    pub interrupted: bool,
    pub elapsed_ms: u64,
    pub cache: CacheStats,
}

/// Shared progress counters.
#[derive(Debug)]
struct Progress {
    blocks: u32,
    cursor: AtomicU64,
    finished: AtomicU32,
    loaded: AtomicU32,
    failed: AtomicU32,
    faulted_records: AtomicU64,
}

impl Progress {
    fn new(blocks: u32) -> Self {
        Self {
            blocks,
            cursor: AtomicU64::new(0),
            finished: AtomicU32::new(0),
            loaded: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            faulted_records: AtomicU64::new(0),
        }
    }

    /// Claim the next unloaded block.
    fn claim(&self) -> Option<u32> {
        let next = self.cursor.fetch_add(1, Ordering::SeqCst);
        if next < u64::from(self.blocks) {
            Some(next as u32)
        } else {
            None
        }
    }

    fn is_complete(&self) -> bool {
        self.finished.load(Ordering::SeqCst) >= self.blocks
    }
}

/// Counts a claimed block as finished however its load ends.
struct FinishGuard<'a>(&'a Progress);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drives a warm-up run over one cache.
pub struct Warmer<S: BlockSource + 'static> {
    cache: Arc<BlockCache<S>>,
    progress: Arc<Progress>,
    pool: WorkerPool,
}

impl<S: BlockSource + 'static> Warmer<S> {
    /// Prepare a run loading blocks into `streams`-wide destinations with
    /// `workers` threads. No thread starts until [`run`](Self::run).
    pub fn new(
        cache: BlockCache<S>,
        streams: usize,
        workers: usize,
        idle_wait: Duration,
    ) -> WarmResult<Self> {
        if streams == 0 {
            return Err(WarmError::NoStreams);
        }

        let cache = Arc::new(cache);
        let progress = Arc::new(Progress::new(cache.block_count()));

        let work_cache = Arc::clone(&cache);
        let work_progress = Arc::clone(&progress);
        let pool = WorkerPool::new(workers, move |worker| {
            let Some(block) = work_progress.claim() else {
                return Step::Idle;
            };
            let _finish = FinishGuard(&work_progress);

            let mut dest = BufferArray::new(streams);
            match work_cache.load_block(&mut dest, block) {
                Ok(()) => {
                    work_progress.loaded.fetch_add(1, Ordering::SeqCst);
                    work_progress
                        .faulted_records
                        .fetch_add(dest.fault_count() as u64, Ordering::SeqCst);
                }
                Err(e) => {
                    work_progress.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(worker, block, error = %e, "failed to load block");
                }
            }
            Step::Busy
        })?
        .with_name("warm")
        .with_idle_wait(idle_wait);

        Ok(Self {
            cache,
            progress,
            pool,
        })
    }

    /// Handle that ends the run early from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.pool.stop_handle()
    }

    /// The cache being warmed.
    pub fn cache(&self) -> &BlockCache<S> {
        &self.cache
    }

    /// Load every block, blocking until done or stopped.
    pub fn run(mut self) -> WarmResult<WarmSummary> {
        let started = Instant::now();
        let stop = self.pool.stop_handle();
        info!(
            blocks = self.progress.blocks,
            workers = self.pool.count(),
            generation = %self.cache.generation().path().display(),
            "warming cache"
        );

        self.pool.start()?;
        while !self.progress.is_complete() && !stop.is_stopping() && !self.pool.stopped() {
            thread::sleep(POLL_INTERVAL);
        }
        self.pool.join();

        let progress = &self.progress;
        let finished = progress.finished.load(Ordering::SeqCst);
        let loaded = progress.loaded.load(Ordering::SeqCst);
        let failed = progress.failed.load(Ordering::SeqCst);

        let summary = WarmSummary {
            blocks: progress.blocks,
            loaded,
            failed,
            panicked: finished.saturating_sub(loaded + failed),
            faulted_records: progress.faulted_records.load(Ordering::SeqCst),
            interrupted: finished < progress.blocks,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cache: self.cache.stats(),
        };

        info!(
            loaded = summary.loaded,
            failed = summary.failed,
            hits = summary.cache.hits,
            misses = summary.cache.misses,
            interrupted = summary.interrupted,
            "warm-up finished"
        );
        Ok(summary)
    }
}
