//! Disk block cache
//!
//! Blocks fetched from a [`BlockSource`](crate::source::BlockSource) are
//! written to disk once and served from disk afterwards:
//!
//! ```text
//! <root>/<cache_id>_<version>/<block>-<block_size>.tar
//! ```
//!
//! ## Generations
//!
//! The version tag is the only eviction mechanism. Opening a cache removes
//! every generation of the same cache id left behind by a different version
//! before the current generation directory is created.
//!
//! ## Concurrency
//!
//! A [`BlockCache`] may be shared between threads, but file writes are not
//! locked. Callers must give each thread disjoint block indices.

mod block;
mod generation;

pub use block::{BlockCache, CacheStats};
pub use generation::{
    ensure, generation_dir, invalidate, is_stale, list_generations, remove_tree, CacheError,
    CacheResult, Generation, GenerationInfo, MatchMode,
};
