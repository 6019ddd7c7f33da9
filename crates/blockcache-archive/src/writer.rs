//! Archive writer.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tar::{Builder, EntryType, Header};

use crate::buffer::BufferArray;
use crate::error::{ArchiveError, ArchiveResult};
use crate::{record_entry_name, ArchiveHeader, FORMAT_VERSION, HEADER_ENTRY};

/// Writes one block's record groups to a new archive file.
///
/// Entries are written with normalized metadata (mtime/uid/gid 0, mode 644)
/// so identical blocks produce identical files.
pub struct ArchiveWriter {
    builder: Builder<BufWriter<File>>,
    written: bool,
}

impl ArchiveWriter {
    /// Create (or truncate) the archive at `path`.
    pub fn create(path: &Path) -> ArchiveResult<Self> {
        let file = File::create(path)?;
        Ok(Self {
            builder: Builder::new(BufWriter::new(file)),
            written: false,
        })
    }

    /// Write every record group held by `buffers`.
    ///
    /// All streams must hold the same number of records and no deferred
    /// faults; a faulted block is never written.
    pub fn write_all(&mut self, buffers: &BufferArray) -> ArchiveResult<()> {
        if self.written {
            return Err(ArchiveError::AlreadyWritten);
        }

        let counts: Vec<usize> = buffers.iter().map(|b| b.len()).collect();
        if counts.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(ArchiveError::MismatchedStreams(counts));
        }
        for (stream, buffer) in buffers.iter().enumerate() {
            if buffer.has_faults() {
                return Err(ArchiveError::DeferredFaults {
                    stream,
                    count: buffer.fault_count(),
                });
            }
        }

        let header = ArchiveHeader {
            format: FORMAT_VERSION,
            item_count: buffers.item_count() as u64,
            stream_count: buffers.stream_count() as u32,
        };
        let header_bytes = serde_json::to_vec(&header)?;
        self.append(HEADER_ENTRY, &header_bytes)?;

        let mut streams: Vec<_> = buffers.iter().map(|b| b.iter()).collect();
        for group in 0..header.item_count {
            for (stream, records) in streams.iter_mut().enumerate() {
                let name = record_entry_name(group, stream as u32);
                let data = records.next().unwrap_or_default();
                self.append(&name, data)?;
            }
        }

        self.written = true;
        Ok(())
    }

    /// Finish the archive and flush it to disk.
    pub fn close(self) -> ArchiveResult<()> {
        let writer = self.builder.into_inner()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> ArchiveResult<()> {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        self.builder.append_data(&mut header, name, data)?;
        Ok(())
    }
}
