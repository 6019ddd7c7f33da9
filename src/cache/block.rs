//! Read-through, write-back block cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use blockcache_archive::{ArchiveError, ArchiveReader, ArchiveResult, ArchiveWriter, BufferArray};
use serde::Serialize;
use tracing::{debug, warn};

use super::generation::{CacheResult, Generation, MatchMode};
use crate::source::BlockSource;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Blocks served from disk
    pub hits: u64,
    /// Blocks loaded from the source
    pub misses: u64,
    /// Blocks loaded from the source that could not be written to disk
    pub persist_failures: u64,
}

/// Disk cache in front of a [`BlockSource`].
///
/// The block size is taken from the source when the cache is built and is
/// part of every cache file name.
#[derive(Debug)]
pub struct BlockCache<S> {
    source: S,
    generation: Generation,
    block_size: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    persist_failures: AtomicU64,
}

impl<S: BlockSource> BlockCache<S> {
    /// Open the cache generation `<root>/<cache_id>_<version>` for `source`.
    ///
    /// Stale generations of `cache_id` are removed first. Fails if `root`
    /// cannot be enumerated, a stale entry cannot be deleted, or the
    /// generation directory cannot be created.
    pub fn new(root: &Path, cache_id: &str, version: &str, source: S) -> CacheResult<Self> {
        Self::with_match_mode(root, cache_id, version, MatchMode::default(), source)
    }

    /// Like [`new`](Self::new) with an explicit stale-matching mode.
    pub fn with_match_mode(
        root: &Path,
        cache_id: &str,
        version: &str,
        mode: MatchMode,
        source: S,
    ) -> CacheResult<Self> {
        let generation = Generation::open(root, cache_id, version, mode)?;
        Ok(Self::with_generation(generation, source))
    }

    /// Build a cache over a generation that has already been opened.
    pub fn with_generation(generation: Generation, source: S) -> Self {
        let block_size = source.block_size();
        Self {
            source,
            generation,
            block_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Cache file for block `block_num`.
    pub fn block_path(&self, block_num: u32) -> PathBuf {
        self.generation.block_path(block_num, self.block_size)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    /// Serve `block_num` from its cache file.
    ///
    /// Returns false when there is no usable cache file; `dest` is untouched
    /// in that case.
    fn read_cached(&self, path: &Path, dest: &mut BufferArray, block_num: u32) -> bool {
        let mut reader = match ArchiveReader::open(path) {
            Ok(reader) => reader,
            Err(ArchiveError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache file, reloading block");
                return false;
            }
        };

        if reader.stream_count() as usize != dest.stream_count() {
            warn!(
                path = %path.display(),
                cached = reader.stream_count(),
                requested = dest.stream_count(),
                "cache file has a different stream count, reloading block"
            );
            return false;
        }
        if reader.item_count() > u64::from(self.block_size) {
            warn!(
                path = %path.display(),
                items = reader.item_count(),
                block_size = self.block_size,
                "cache file holds more items than a block, reloading block"
            );
            return false;
        }

        for _ in 0..reader.item_count() {
            for buffer in dest.iter_mut() {
                if let Err(e) = reader.read_next(buffer) {
                    buffer.add_fault(e);
                }
            }
        }
        reader.close();

        let faults = dest.fault_count();
        if faults > 0 {
            warn!(block = block_num, faults, path = %path.display(), "cached block has damaged records");
        }
        true
    }

    /// Write `dest` to `path` via a temporary file.
    fn persist(&self, path: &Path, dest: &BufferArray) -> ArchiveResult<()> {
        let temp_path = path.with_extension("tar.tmp");
        if let Err(e) = write_archive(&temp_path, dest) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn write_archive(path: &Path, dest: &BufferArray) -> ArchiveResult<()> {
    let mut writer = ArchiveWriter::create(path)?;
    writer.write_all(dest)?;
    writer.close()
}

impl<S: BlockSource> BlockSource for BlockCache<S> {
    type Error = S::Error;

    /// Load block `block_num` from disk, or from the source on a miss.
    ///
    /// `dest` is expected to be empty. Damaged cached records become
    /// deferred faults in `dest`. Source errors are returned unchanged;
    /// failing to write the cache file is logged and otherwise ignored.
    fn load_block(&self, dest: &mut BufferArray, block_num: u32) -> Result<(), S::Error> {
        let path = self.block_path(block_num);

        if self.read_cached(&path, dest, block_num) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(block = block_num, "cache hit");
            return Ok(());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(block = block_num, "cache miss");
        self.source.load_block(dest, block_num)?;

        if let Err(e) = self.persist(&path, dest) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!(block = block_num, path = %path.display(), error = %e, "failed to write cache file");
        }
        Ok(())
    }

    fn object_count(&self) -> u32 {
        self.source.object_count()
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }
}
