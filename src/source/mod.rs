//! Block sources
//!
//! A [`BlockSource`] produces the content of a block on demand. Items are
//! grouped into fixed-size blocks: block `b` covers items
//! `[b * block_size, (b + 1) * block_size)`, the last block possibly short.
//!
//! [`BlockCache`](crate::cache::BlockCache) is itself a `BlockSource`, so a
//! cache can sit in front of any source, including another cache.

mod manifest;

pub use manifest::{ManifestSource, SourceError};

use blockcache_archive::BufferArray;

/// Capability to fetch blocks of records by index.
pub trait BlockSource: Send + Sync {
    /// Error produced when a block cannot be loaded.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load block `block_num`, appending one record per item to every
    /// stream of `dest`.
    fn load_block(&self, dest: &mut BufferArray, block_num: u32) -> Result<(), Self::Error>;

    /// Total number of addressable items.
    fn object_count(&self) -> u32;

    /// Number of items per block.
    fn block_size(&self) -> u32;

    /// Number of blocks needed to cover every item.
    fn block_count(&self) -> u32 {
        let block_size = self.block_size();
        if block_size == 0 {
            return 0;
        }
        self.object_count().div_ceil(block_size)
    }
}
