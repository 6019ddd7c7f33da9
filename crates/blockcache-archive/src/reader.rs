//! Archive reader.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tar::Archive;

use crate::buffer::RecordBuffer;
use crate::error::{ArchiveError, ArchiveResult};
use crate::{record_entry_name, ArchiveHeader, FORMAT_VERSION, HEADER_ENTRY};

/// A raw entry pulled from the tar stream.
type RawEntry = ArchiveResult<(String, Vec<u8>)>;

/// Reads one block's record groups back from an archive file.
///
/// Opening validates the header and loads every record entry into memory,
/// stopping at the first entry that cannot be read. Entry names are checked
/// one at a time by [`read_next`](Self::read_next), so a damaged or missing
/// record only fails the read that reaches it.
pub struct ArchiveReader {
    header: ArchiveHeader,
    entries: VecDeque<RawEntry>,
    position: u64,
}

impl ArchiveReader {
    /// Open the archive at `path` and read its header.
    ///
    /// Fails if the file cannot be opened or does not start with a valid
    /// header. Callers treat any failure here as "not cached".
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut archive = Archive::new(BufReader::new(file));
        let mut entries = archive.entries()?;

        let (name, data) = match entries.next() {
            Some(entry) => read_entry(entry, file_len)?,
            None => return Err(ArchiveError::MissingHeader(String::new())),
        };
        if name != HEADER_ENTRY {
            return Err(ArchiveError::MissingHeader(name));
        }

        let header: ArchiveHeader = serde_json::from_slice(&data)?;
        if header.format != FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedFormat(header.format));
        }
        if header.stream_count == 0 && header.item_count > 0 {
            return Err(ArchiveError::NoStreams {
                item_count: header.item_count,
            });
        }

        // Everything after the first broken entry is unreachable, so stop
        // there and let later reads report exhaustion.
        let mut records = VecDeque::new();
        for entry in entries {
            let raw = read_entry(entry, file_len);
            let failed = raw.is_err();
            records.push_back(raw);
            if failed {
                break;
            }
        }

        Ok(Self {
            header,
            entries: records,
            position: 0,
        })
    }

    /// Number of record groups stored in the archive.
    pub fn item_count(&self) -> u64 {
        self.header.item_count
    }

    /// Number of records per group.
    pub fn stream_count(&self) -> u32 {
        self.header.stream_count
    }

    /// Read the next record into `dest`.
    ///
    /// On failure nothing is appended to `dest`; the caller decides whether
    /// to record the error as a deferred fault.
    pub fn read_next(&mut self, dest: &mut RecordBuffer) -> ArchiveResult<()> {
        let position = self.position;
        self.position += 1;

        let stream_count = u64::from(self.header.stream_count.max(1));
        let expected = record_entry_name(position / stream_count, (position % stream_count) as u32);

        let (name, data) = match self.entries.pop_front() {
            Some(entry) => entry?,
            None => return Err(ArchiveError::Exhausted { position }),
        };
        if name != expected {
            return Err(ArchiveError::UnexpectedEntry {
                expected,
                found: name,
            });
        }

        dest.push(data);
        Ok(())
    }

    /// Release the archive.
    pub fn close(self) {}
}

/// Read one entry whole. Sizes are untrusted: an entry can never be larger
/// than the file holding it.
fn read_entry<R: Read>(entry: std::io::Result<tar::Entry<'_, R>>, file_len: u64) -> RawEntry {
    let mut entry = entry?;
    let name = entry.path()?.to_string_lossy().into_owned();
    let size = entry.size();
    if size > file_len {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("entry '{}' claims {} bytes in a {} byte file", name, size, file_len),
        )));
    }

    let mut data = Vec::new();
    entry.by_ref().take(size).read_to_end(&mut data)?;
    if data.len() as u64 != size {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("entry '{}' truncated: {} of {} bytes", name, data.len(), size),
        )));
    }
    Ok((name, data))
}
