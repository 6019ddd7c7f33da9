//! Cache configuration
//!
//! Parses and validates the TOML file consumed by `blockcache warm`:
//!
//! ```toml
//! [cache]
//! root = "/var/cache/blockcache"
//! id = "train"
//! version = "v3"
//! match_mode = "prefix"
//!
//! [source]
//! manifest = "train.csv"
//! block_size = 5000
//!
//! [workers]
//! count = 4
//! idle_wait_ms = 1
//! ```
//!
//! Relative paths in a loaded file are resolved against the file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::MatchMode;
use blockcache_pool::DEFAULT_IDLE_WAIT_MS;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCacheConfig {
    pub cache: CacheSection,
    pub source: SourceSection,
    #[serde(default)]
    pub workers: WorkersSection,
}

/// `[cache]`: where generations live and which one is current
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    /// Directory holding every generation directory
    pub root: PathBuf,

    /// Cache identifier, the first part of generation directory names
    pub id: String,

    /// Version tag of the current generation
    pub version: String,

    /// How stale generations are recognized (default: prefix)
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// `[source]`: the manifest to cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    pub manifest: PathBuf,

    /// Items per block
    pub block_size: u32,
}

/// `[workers]`: warm-up pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Wait between polls once a worker runs out of blocks
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_wait_ms: default_idle_wait_ms(),
        }
    }
}

fn default_worker_count() -> usize {
    1
}

fn default_idle_wait_ms() -> u64 {
    DEFAULT_IDLE_WAIT_MS
}

/// Errors that can occur when loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl BlockCacheConfig {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content)?;
        if let Some(base_dir) = path.parent() {
            config.resolve_paths(base_dir);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BlockCacheConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative paths against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.cache.root.is_relative() {
            self.cache.root = base_dir.join(&self.cache.root);
        }
        if self.source.manifest.is_relative() {
            self.source.manifest = base_dir.join(&self.source.manifest);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("cache.root"));
        }
        if self.cache.id.is_empty() {
            return Err(ConfigError::MissingField("cache.id"));
        }
        validate_component("cache.id", &self.cache.id)?;

        // An empty version is contained in every name, so nothing would
        // ever be invalidated.
        if self.cache.version.is_empty() {
            return Err(ConfigError::MissingField("cache.version"));
        }
        validate_component("cache.version", &self.cache.version)?;

        if self.source.manifest.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("source.manifest"));
        }
        if self.source.block_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.block_size",
                reason: "block size must be at least 1".to_string(),
            });
        }

        if self.workers.count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers.count",
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(())
    }
}

/// Check that `value` can be used inside a single directory name.
fn validate_component(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.contains('/') || value.contains('\\') {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("'{}' must not contain path separators", value),
        });
    }
    if value == "." || value == ".." {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("'{}' is not a valid name", value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
[cache]
root = "/var/cache/blockcache"
id = "train"
version = "v3"
match_mode = "exact"

[source]
manifest = "train.csv"
block_size = 5000

[workers]
count = 4
idle_wait_ms = 5
"#;

    const MINIMAL: &str = r#"
[cache]
root = "cache"
id = "train"
version = "v3"

[source]
manifest = "train.csv"
block_size = 10
"#;

    #[test]
    fn test_parse_full() {
        let config = BlockCacheConfig::parse(FULL).unwrap();

        assert_eq!(config.cache.root, PathBuf::from("/var/cache/blockcache"));
        assert_eq!(config.cache.id, "train");
        assert_eq!(config.cache.version, "v3");
        assert_eq!(config.cache.match_mode, MatchMode::Exact);
        assert_eq!(config.source.block_size, 5000);
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.workers.idle_wait_ms, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let config = BlockCacheConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.cache.match_mode, MatchMode::Prefix);
        assert_eq!(config.workers, WorkersSection::default());
        assert_eq!(config.workers.count, 1);
        assert_eq!(config.workers.idle_wait_ms, DEFAULT_IDLE_WAIT_MS);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = BlockCacheConfig::load(file.path()).unwrap();
        let base = file.path().parent().unwrap();

        assert_eq!(config.cache.root, base.join("cache"));
        assert_eq!(config.source.manifest, base.join("train.csv"));
    }

    #[test]
    fn test_load_keeps_absolute_paths() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = BlockCacheConfig::load(file.path()).unwrap();
        assert_eq!(config.cache.root, PathBuf::from("/var/cache/blockcache"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = BlockCacheConfig::load(Path::new("/nonexistent/blockcache.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_missing_section() {
        let result = BlockCacheConfig::parse("[cache]\nroot = \"r\"\nid = \"a\"\nversion = \"v\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_match_mode() {
        let content = MINIMAL.replace("version = \"v3\"", "version = \"v3\"\nmatch_mode = \"fuzzy\"");
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_version_rejected() {
        let content = MINIMAL.replace("version = \"v3\"", "version = \"\"");
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::MissingField("cache.version"))
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let content = MINIMAL.replace("id = \"train\"", "id = \"\"");
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::MissingField("cache.id"))
        ));
    }

    #[test]
    fn test_version_with_separator_rejected() {
        let content = MINIMAL.replace("version = \"v3\"", "version = \"v3/evil\"");
        match BlockCacheConfig::parse(&content) {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "cache.version"),
            other => panic!("Expected InvalidValue error, got {:?}", other),
        }
    }

    #[test]
    fn test_dot_id_rejected() {
        let content = MINIMAL.replace("id = \"train\"", "id = \"..\"");
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::InvalidValue { field: "cache.id", .. })
        ));
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let content = MINIMAL.replace("block_size = 10", "block_size = 0");
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::InvalidValue { field: "source.block_size", .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let content = format!("{}\n[workers]\ncount = 0\n", MINIMAL);
        assert!(matches!(
            BlockCacheConfig::parse(&content),
            Err(ConfigError::InvalidValue { field: "workers.count", .. })
        ));
    }
}
