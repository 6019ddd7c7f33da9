//! Block cache lifecycle tests
//!
//! Exercises generations, miss/hit behavior and failure handling through
//! the public API with real files on disk.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use blockcache::cache::{self, MatchMode};
use blockcache::{BlockCache, BlockSource, BufferArray, ManifestSource};
use blockcache_archive::ArchiveReader;

/// Source yielding `"<item>/<stream>"` records and counting loads.
#[derive(Debug)]
struct CountingSource {
    objects: u32,
    block_size: u32,
    loads: AtomicUsize,
}

impl CountingSource {
    fn new(objects: u32, block_size: u32) -> Self {
        Self {
            objects,
            block_size,
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl BlockSource for CountingSource {
    type Error = io::Error;

    fn load_block(&self, dest: &mut BufferArray, block_num: u32) -> Result<(), io::Error> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let start = block_num * self.block_size;
        let end = (start + self.block_size).min(self.objects);
        for item in start..end {
            for stream in 0..dest.stream_count() {
                dest[stream].push(format!("{}/{}", item, stream));
            }
        }
        Ok(())
    }

    fn object_count(&self) -> u32 {
        self.objects
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }
}

fn child_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn write_dataset(dir: &Path, items: usize) -> std::path::PathBuf {
    let mut manifest = String::new();
    for i in 0..items {
        let image = format!("img{:03}.bin", i);
        let label = format!("img{:03}.txt", i);
        fs::write(dir.join(&image), vec![i as u8; 16 + i]).unwrap();
        fs::write(dir.join(&label), format!("class-{}", i % 4)).unwrap();
        manifest.push_str(&format!("{},{}\n", image, label));
    }
    let path = dir.join("dataset.csv");
    fs::write(&path, manifest).unwrap();
    path
}

// =============================================================================
// Round trip through the cache
// =============================================================================

#[test]
fn test_round_trip_does_not_consult_source() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "ds", "v1", CountingSource::new(10, 4)).unwrap();

    let mut first = BufferArray::new(3);
    cache.load_block(&mut first, 1).unwrap();

    let mut second = BufferArray::new(3);
    cache.load_block(&mut second, 1).unwrap();

    assert_eq!(cache.source().loads(), 1);
    for stream in 0..3 {
        let a: Vec<&[u8]> = first[stream].iter().collect();
        let b: Vec<&[u8]> = second[stream].iter().collect();
        assert_eq!(a, b);
    }
    assert_eq!(second[2].record(0).unwrap().unwrap(), b"4/2");
}

#[test]
fn test_manifest_dataset_survives_restart() {
    let data_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let manifest = write_dataset(data_dir.path(), 9);

    let mut expected = Vec::new();
    {
        let source = ManifestSource::open(&manifest, 4).unwrap();
        let cache = BlockCache::new(cache_dir.path(), "ds", "v1", source).unwrap();
        for block in 0..cache.block_count() {
            let mut dest = BufferArray::new(2);
            cache.load_block(&mut dest, block).unwrap();
            expected.push(dest);
        }
        assert_eq!(cache.stats().misses, 3);
    }

    // The source files are gone; every block must come from disk.
    for i in 0..9 {
        fs::remove_file(data_dir.path().join(format!("img{:03}.bin", i))).unwrap();
    }

    let source = ManifestSource::open(&manifest, 4).unwrap();
    let cache = BlockCache::new(cache_dir.path(), "ds", "v1", source).unwrap();
    for (block, want) in expected.iter().enumerate() {
        let mut dest = BufferArray::new(2);
        cache.load_block(&mut dest, block as u32).unwrap();
        assert_eq!(dest.item_count(), want.item_count());
        for stream in 0..2 {
            assert!(dest[stream].iter().eq(want[stream].iter()));
        }
    }
    assert_eq!(cache.stats().hits, 3);
    assert_eq!(cache.stats().misses, 0);
}

// =============================================================================
// Generations
// =============================================================================

#[test]
fn test_construction_invalidates_other_versions() {
    let temp_dir = TempDir::new().unwrap();
    for name in ["foo_v1", "foo_v2", "bar_v1"] {
        fs::create_dir(temp_dir.path().join(name)).unwrap();
    }
    fs::write(temp_dir.path().join("foo_v1").join("0-4.tar"), b"old").unwrap();

    let _cache = BlockCache::new(temp_dir.path(), "foo", "v2", CountingSource::new(10, 4)).unwrap();

    assert_eq!(child_names(temp_dir.path()), vec!["bar_v1", "foo_v2"]);
}

#[test]
fn test_setup_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();

    let first = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();
    let second = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();

    assert_eq!(first.generation(), second.generation());
    assert_eq!(child_names(temp_dir.path()), vec!["foo_v1"]);
}

#[test]
fn test_prefix_and_exact_modes_differ_on_shared_prefix() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("foobar_v1")).unwrap();

    BlockCache::with_match_mode(
        temp_dir.path(),
        "foo",
        "v2",
        MatchMode::Exact,
        CountingSource::new(1, 1),
    )
    .unwrap();
    assert_eq!(child_names(temp_dir.path()), vec!["foo_v2", "foobar_v1"]);

    BlockCache::new(temp_dir.path(), "foo", "v2", CountingSource::new(1, 1)).unwrap();
    assert_eq!(child_names(temp_dir.path()), vec!["foo_v2"]);
}

#[test]
fn test_unreadable_root_fails_construction() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope");

    let err = BlockCache::new(&missing, "foo", "v1", CountingSource::new(1, 1)).unwrap_err();
    assert!(matches!(err, cache::CacheError::Enumerate { .. }));
}

#[test]
fn test_info_after_warm() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();
    for block in 0..cache.block_count() {
        cache.load_block(&mut BufferArray::new(1), block).unwrap();
    }

    let generations = cache::list_generations(temp_dir.path(), "foo").unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].version, "v1");
    assert_eq!(generations[0].block_files, 3);
    assert!(generations[0].total_bytes > 0);
}

// =============================================================================
// Miss, hit and failure handling
// =============================================================================

#[test]
fn test_miss_then_hit() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();

    cache.load_block(&mut BufferArray::new(1), 0).unwrap();
    assert_eq!(cache.source().loads(), 1);
    assert!(cache.block_path(0).is_file());

    cache.load_block(&mut BufferArray::new(1), 0).unwrap();
    assert_eq!(cache.source().loads(), 1);
}

#[test]
fn test_write_failure_still_returns_data() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();
    fs::remove_dir(cache.generation().path()).unwrap();

    let mut dest = BufferArray::new(1);
    cache.load_block(&mut dest, 2).unwrap();

    assert_eq!(dest.item_count(), 2);
    assert_eq!(dest[0].record(1).unwrap().unwrap(), b"9/0");
    assert_eq!(cache.stats().persist_failures, 1);

    // Still uncached, so the next load goes back to the source.
    cache.load_block(&mut BufferArray::new(1), 2).unwrap();
    assert_eq!(cache.source().loads(), 2);
}

#[test]
fn test_truncated_cache_file_yields_deferred_faults() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();
    cache.load_block(&mut BufferArray::new(2), 0).unwrap();

    // Keep the header and the first group (three 512-byte entries with
    // their headers), cut into the next entry.
    let path = cache.block_path(0);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..512 * 6 + 100]).unwrap();

    let mut dest = BufferArray::new(2);
    cache.load_block(&mut dest, 0).unwrap();

    assert_eq!(cache.source().loads(), 1);
    assert_eq!(dest[0].len(), 4);
    assert_eq!(dest[1].len(), 4);
    assert_eq!(dest[0].record(0).unwrap().unwrap(), b"0/0");
    assert_eq!(dest[1].record(0).unwrap().unwrap(), b"0/1");
    assert!(dest[0].record(3).unwrap().is_err());
    assert!(dest[1].record(3).unwrap().is_err());
    assert!(dest.fault_count() >= 2);
}

#[test]
fn test_garbage_cache_file_is_replaced() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(10, 4)).unwrap();
    fs::write(cache.block_path(1), b"garbage").unwrap();

    let mut dest = BufferArray::new(1);
    cache.load_block(&mut dest, 1).unwrap();
    assert_eq!(cache.source().loads(), 1);
    assert_eq!(dest[0].record(0).unwrap().unwrap(), b"4/0");

    let reader = ArchiveReader::open(&cache.block_path(1)).unwrap();
    assert_eq!(reader.item_count(), 4);
    assert_eq!(reader.stream_count(), 1);
}

#[test]
fn test_cache_file_with_huge_entry_size_falls_back_to_source() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BlockCache::new(temp_dir.path(), "foo", "v1", CountingSource::new(12, 5)).unwrap();

    // A header entry claiming 2^62 bytes, followed by a little padding.
    let mut header = tar::Header::new_gnu();
    header.set_path(blockcache_archive::HEADER_ENTRY).unwrap();
    header.set_size(1 << 62);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    let mut bytes = header.as_bytes().to_vec();
    bytes.extend(std::iter::repeat(0u8).take(1024));
    fs::write(cache.block_path(0), bytes).unwrap();

    let mut dest = BufferArray::new(2);
    cache.load_block(&mut dest, 0).unwrap();
    assert_eq!(cache.source().loads(), 1);
    assert_eq!(dest.item_count(), 5);
    assert_eq!(dest[1].record(4).unwrap().unwrap(), b"4/1");

    // The damaged file was replaced by a readable one.
    cache.load_block(&mut BufferArray::new(2), 0).unwrap();
    assert_eq!(cache.source().loads(), 1);
    assert_eq!(cache.stats().hits, 1);
}
