//! Block archive format
//!
//! A block is stored on disk as a tar stream holding an ordered sequence of
//! record groups. Each group holds one record per data stream (payload,
//! label, metadata, ...). The first entry is a small JSON header that
//! records how many groups and streams follow:
//!
//! ```text
//! header.json   {"format":1,"item_count":N,"stream_count":M}
//! 0.0           group 0, stream 0
//! 0.1           group 0, stream 1
//! 1.0           group 1, stream 0
//! ...
//! ```
//!
//! Records are read back one at a time into caller-owned [`RecordBuffer`]s.
//! A record that cannot be decoded is kept as a deferred fault in the
//! affected buffer so the rest of the block can still be used.

pub mod buffer;
pub mod error;
pub mod reader;
pub mod writer;

pub use buffer::{BufferArray, RecordBuffer};
pub use error::{ArchiveError, ArchiveResult};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

use serde::{Deserialize, Serialize};

/// File extension used for block archives.
pub const EXTENSION: &str = "tar";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the header entry at the start of every archive.
pub const HEADER_ENTRY: &str = "header.json";

/// Header stored as the first entry of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Format version
    pub format: u32,
    /// Number of record groups
    pub item_count: u64,
    /// Number of records per group
    pub stream_count: u32,
}

/// Entry name of the record for `group` in `stream`.
pub fn record_entry_name(group: u64, stream: u32) -> String {
    format!("{}.{}", group, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_entry_name() {
        assert_eq!(record_entry_name(0, 0), "0.0");
        assert_eq!(record_entry_name(12, 3), "12.3");
    }

    #[test]
    fn test_header_serialization() {
        let header = ArchiveHeader {
            format: FORMAT_VERSION,
            item_count: 4,
            stream_count: 2,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(json, r#"{"format":1,"item_count":4,"stream_count":2}"#);
    }
}
