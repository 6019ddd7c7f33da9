//! blockcache - disk cache for block-oriented data sources
//!
//! A [`BlockCache`] sits in front of any [`BlockSource`]. The first load of
//! a block comes from the source and is written to disk; later loads are
//! served from the cache file. Cache files are grouped into version-tagged
//! generations, and opening a cache discards generations left behind by
//! other versions.
//!
//! The [`warm`] driver pulls every block of a source through a cache using
//! a [`WorkerPool`](blockcache_pool::WorkerPool).

pub mod cache;
pub mod config;
pub mod signal;
pub mod source;
pub mod warm;

pub use cache::{BlockCache, CacheError, CacheResult, CacheStats, Generation, MatchMode};
pub use config::{BlockCacheConfig, ConfigError};
pub use source::{BlockSource, ManifestSource, SourceError};
pub use warm::{WarmError, WarmResult, WarmSummary, Warmer};

pub use blockcache_archive::{ArchiveError, BufferArray, RecordBuffer};
pub use blockcache_pool::{FaultPolicy, PoolError, PoolState, Step, StopHandle, WorkerPool};
