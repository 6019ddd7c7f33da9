//! Archive errors.

use std::io;

use thiserror::Error;

/// Archive result type
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors from reading or writing block archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid archive header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("archive does not start with a header entry (found '{0}')")]
    MissingHeader(String),

    #[error("unsupported archive format version {0}")]
    UnsupportedFormat(u32),

    #[error("archive declares {item_count} item(s) but no streams")]
    NoStreams { item_count: u64 },

    #[error("expected entry '{expected}', found '{found}'")]
    UnexpectedEntry { expected: String, found: String },

    #[error("no record at position {position}; archive ended early")]
    Exhausted { position: u64 },

    #[error("streams hold mismatched record counts: {0:?}")]
    MismatchedStreams(Vec<usize>),

    #[error("stream {stream} holds {count} deferred fault(s)")]
    DeferredFaults { stream: usize, count: usize },

    #[error("records were already written to this archive")]
    AlreadyWritten,
}
