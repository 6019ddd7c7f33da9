//! Cache generation directories
//!
//! Each (cache id, version) pair owns one directory under the cache root:
//!
//! ```text
//! <root>/<cache_id>_<version>/<block>-<block_size>.tar
//! ```
//!
//! Opening a generation first removes stale generations of the same cache
//! id, then creates the current directory if needed.
//!
//! ## Stale matching
//!
//! With [`MatchMode::Prefix`] (the default) a child of the root is stale if
//! its name starts with the cache id and does not contain the version
//! anywhere. This also matches unrelated ids that share the prefix: id `foo`
//! treats `foobar_v1` as stale. [`MatchMode::Exact`] only matches
//! `<cache_id>_<other version>`.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

use blockcache_archive::EXTENSION;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Filesystem errors from setting up a cache generation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to enumerate cache root {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache path exists but is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to delete {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How stale generation directories are recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Name starts with the cache id and does not contain the version.
    #[default]
    Prefix,
    /// Name is `<cache_id>_<v>` with `v` different from the version.
    Exact,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Exact => "exact",
        }
    }
}

/// Check whether a root entry named `name` holds a stale generation.
pub fn is_stale(name: &str, cache_id: &str, version: &str, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Prefix => name.starts_with(cache_id) && !name.contains(version),
        MatchMode::Exact => name
            .strip_prefix(cache_id)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|stored| stored != version),
    }
}

/// Directory of generation (`cache_id`, `version`) under `root`.
pub fn generation_dir(root: &Path, cache_id: &str, version: &str) -> PathBuf {
    root.join(format!("{}_{}", cache_id, version))
}

/// Remove every stale generation of `cache_id` under `root`.
///
/// Returns the removed paths. Failing to list `root` or to delete any part
/// of a stale entry is an error.
pub fn invalidate(
    root: &Path,
    cache_id: &str,
    version: &str,
    mode: MatchMode,
) -> CacheResult<Vec<PathBuf>> {
    let enumerate_error = |source| CacheError::Enumerate {
        path: root.to_path_buf(),
        source,
    };

    let mut removed = Vec::new();
    for entry in fs::read_dir(root).map_err(enumerate_error)? {
        let entry = entry.map_err(enumerate_error)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if !is_stale(&name, cache_id, version, mode) {
            continue;
        }

        let path = entry.path();
        remove_tree(&path)?;
        info!(path = %path.display(), cache_id, version, "removed stale cache generation");
        removed.push(path);
    }

    Ok(removed)
}

/// Delete `path` and everything below it, children before parents.
///
/// Symlinks are removed, never followed.
pub fn remove_tree(path: &Path) -> CacheResult<()> {
    let remove_error = |path: &Path, source| CacheError::Remove {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::symlink_metadata(path).map_err(|e| remove_error(path, e))?;
    if !metadata.is_dir() {
        return fs::remove_file(path).map_err(|e| remove_error(path, e));
    }

    for entry in WalkDir::new(path).follow_links(false).contents_first(true) {
        let entry = entry.map_err(|e| {
            let failed = e.path().unwrap_or(path).to_path_buf();
            remove_error(&failed, io::Error::from(e))
        })?;

        let result = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        result.map_err(|e| remove_error(entry.path(), e))?;
    }

    Ok(())
}

/// Create `path` (rwxrwxr-x). An existing directory is not an error.
pub fn ensure(path: &Path) -> CacheResult<()> {
    let mut builder = DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o775);
    }

    match builder.create(path) {
        Ok(()) => {
            debug!(path = %path.display(), "created cache directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(())
            } else {
                Err(CacheError::NotADirectory(path.to_path_buf()))
            }
        }
        Err(source) => Err(CacheError::CreateDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// One version-tagged cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    root: PathBuf,
    cache_id: String,
    version: String,
    path: PathBuf,
}

impl Generation {
    /// Describe a generation without touching the filesystem.
    pub fn new(root: &Path, cache_id: &str, version: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            cache_id: cache_id.to_string(),
            version: version.to_string(),
            path: generation_dir(root, cache_id, version),
        }
    }

    /// Invalidate stale generations of `cache_id`, then ensure this
    /// generation's directory exists.
    pub fn open(root: &Path, cache_id: &str, version: &str, mode: MatchMode) -> CacheResult<Self> {
        let generation = Self::new(root, cache_id, version);
        invalidate(root, cache_id, version, mode)?;
        ensure(&generation.path)?;
        Ok(generation)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The generation directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache file for block `block_num` at `block_size`.
    pub fn block_path(&self, block_num: u32, block_size: u32) -> PathBuf {
        self.path
            .join(format!("{}-{}.{}", block_num, block_size, EXTENSION))
    }
}

/// Summary of one generation directory on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInfo {
    /// Directory name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Version part of the directory name
    pub version: String,
    /// Number of block archives
    pub block_files: usize,
    /// Total size of all files in bytes
    pub total_bytes: u64,
}

/// List the generation directories of `cache_id` under `root`, by name.
pub fn list_generations(root: &Path, cache_id: &str) -> CacheResult<Vec<GenerationInfo>> {
    let enumerate_error = |source| CacheError::Enumerate {
        path: root.to_path_buf(),
        source,
    };
    let prefix = format!("{}_", cache_id);

    let mut generations = Vec::new();
    for entry in fs::read_dir(root).map_err(enumerate_error)? {
        let entry = entry.map_err(enumerate_error)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(version) = name.strip_prefix(&prefix) else {
            continue;
        };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let mut block_files = 0;
        let mut total_bytes = 0;
        for file in WalkDir::new(&path).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !file.file_type().is_file() {
                continue;
            }
            if file.path().extension().is_some_and(|ext| ext == EXTENSION) {
                block_files += 1;
            }
            total_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
        }

        generations.push(GenerationInfo {
            version: version.to_string(),
            name,
            path,
            block_files,
            total_bytes,
        });
    }

    generations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(generations)
}
