//! Manifest-backed block source.
//!
//! A manifest is a text file with one item per line. Each line lists one
//! file per data stream, separated by commas:
//!
//! ```text
//! # image, label
//! images/0001.jpg,labels/0001.txt
//! images/0002.jpg,labels/0002.txt
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Relative paths are
//! resolved against the manifest's directory. Loading an item reads each of
//! its files whole as one record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use blockcache_archive::BufferArray;
use thiserror::Error;
use tracing::debug;

use super::BlockSource;

/// Errors from the manifest source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest line {line}: expected {expected} column(s), found {found}")]
    Columns {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("manifest lists no items")]
    Empty,

    #[error("manifest lists {0} items, more than can be addressed")]
    TooManyItems(usize),

    #[error("block size must be at least 1")]
    ZeroBlockSize,

    #[error("block {block} is out of range ({blocks} block(s))")]
    OutOfRange { block: u32, blocks: u32 },

    #[error("destination has {found} stream(s), manifest has {expected}")]
    StreamMismatch { expected: usize, found: usize },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Block source reading item files listed in a manifest.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    items: Vec<Vec<PathBuf>>,
    streams: usize,
    block_size: u32,
}

impl ManifestSource {
    /// Load the manifest at `path`.
    pub fn open(path: &Path, block_size: u32) -> Result<Self, SourceError> {
        let content = fs::read_to_string(path).map_err(|source| SourceError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base_dir, block_size)
    }

    /// Parse manifest content, resolving relative paths against `base_dir`.
    pub fn parse(content: &str, base_dir: &Path, block_size: u32) -> Result<Self, SourceError> {
        if block_size == 0 {
            return Err(SourceError::ZeroBlockSize);
        }

        let mut items: Vec<Vec<PathBuf>> = Vec::new();
        let mut streams = 0;

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let columns: Vec<PathBuf> = line
                .split(',')
                .map(|column| base_dir.join(column.trim()))
                .collect();

            if items.is_empty() {
                streams = columns.len();
            } else if columns.len() != streams {
                return Err(SourceError::Columns {
                    line: index + 1,
                    expected: streams,
                    found: columns.len(),
                });
            }
            items.push(columns);
        }

        if items.is_empty() {
            return Err(SourceError::Empty);
        }
        if u32::try_from(items.len()).is_err() {
            return Err(SourceError::TooManyItems(items.len()));
        }

        Ok(Self {
            items,
            streams,
            block_size,
        })
    }

    /// Number of files per item.
    pub fn stream_count(&self) -> usize {
        self.streams
    }

    /// Files of item `index`, one per stream.
    pub fn item(&self, index: usize) -> Option<&[PathBuf]> {
        self.items.get(index).map(Vec::as_slice)
    }
}

impl BlockSource for ManifestSource {
    type Error = SourceError;

    fn load_block(&self, dest: &mut BufferArray, block_num: u32) -> Result<(), SourceError> {
        if dest.stream_count() != self.streams {
            return Err(SourceError::StreamMismatch {
                expected: self.streams,
                found: dest.stream_count(),
            });
        }

        let blocks = self.block_count();
        if block_num >= blocks {
            return Err(SourceError::OutOfRange {
                block: block_num,
                blocks,
            });
        }

        let start = block_num as usize * self.block_size as usize;
        let end = (start + self.block_size as usize).min(self.items.len());

        for item in &self.items[start..end] {
            for (stream, path) in item.iter().enumerate() {
                let data = fs::read(path).map_err(|source| SourceError::Read {
                    path: path.clone(),
                    source,
                })?;
                dest[stream].push(data);
            }
        }

        debug!(block = block_num, items = end - start, "loaded block from manifest");
        Ok(())
    }

    fn object_count(&self) -> u32 {
        self.items.len() as u32
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }
}
