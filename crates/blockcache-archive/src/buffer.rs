//! Destination containers for block records.
//!
//! A [`BufferArray`] holds one [`RecordBuffer`] per data stream. Loading a
//! block appends one record to every buffer per item, so all buffers of a
//! fully loaded block have the same length.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use crate::error::ArchiveError;

/// Ordered records for a single data stream.
///
/// A slot may hold a deferred fault instead of data. Faulted slots still
/// occupy a position so records stay aligned with the other streams.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    records: Vec<Vec<u8>>,
    faults: BTreeMap<usize, ArchiveError>,
}

impl RecordBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn push(&mut self, record: impl Into<Vec<u8>>) {
        self.records.push(record.into());
    }

    /// Append a deferred fault in place of a record.
    pub fn add_fault(&mut self, error: ArchiveError) {
        self.faults.insert(self.records.len(), error);
        self.records.push(Vec::new());
    }

    /// Number of slots, faulted ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the record at `index`, or the fault stored in its place.
    pub fn record(&self, index: usize) -> Option<Result<&[u8], &ArchiveError>> {
        if index >= self.records.len() {
            return None;
        }
        match self.faults.get(&index) {
            Some(fault) => Some(Err(fault)),
            None => Some(Ok(self.records[index].as_slice())),
        }
    }

    /// Get the fault at `index`, if that slot faulted.
    pub fn fault(&self, index: usize) -> Option<&ArchiveError> {
        self.faults.get(&index)
    }

    /// Iterate over faulted slots in order.
    pub fn faults(&self) -> impl Iterator<Item = (usize, &ArchiveError)> {
        self.faults.iter().map(|(index, fault)| (*index, fault))
    }

    pub fn fault_count(&self) -> usize {
        self.faults.len()
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Iterate over raw slot contents. Faulted slots yield an empty slice.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.records.iter().map(Vec::as_slice)
    }

    /// Remove all records and faults.
    pub fn clear(&mut self) {
        self.records.clear();
        self.faults.clear();
    }
}

/// One [`RecordBuffer`] per data stream of a block.
#[derive(Debug, Default)]
pub struct BufferArray {
    buffers: Vec<RecordBuffer>,
}

impl BufferArray {
    /// Create an array with `streams` empty buffers.
    pub fn new(streams: usize) -> Self {
        Self {
            buffers: (0..streams).map(|_| RecordBuffer::new()).collect(),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of record groups, taken from the first stream.
    pub fn item_count(&self) -> usize {
        self.buffers.first().map(RecordBuffer::len).unwrap_or(0)
    }

    /// Total deferred faults across all streams.
    pub fn fault_count(&self) -> usize {
        self.buffers.iter().map(RecordBuffer::fault_count).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecordBuffer> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, RecordBuffer> {
        self.buffers.iter_mut()
    }

    /// Clear every stream, keeping the stream count.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}

impl Index<usize> for BufferArray {
    type Output = RecordBuffer;

    fn index(&self, stream: usize) -> &RecordBuffer {
        &self.buffers[stream]
    }
}

impl IndexMut<usize> for BufferArray {
    fn index_mut(&mut self, stream: usize) -> &mut RecordBuffer {
        &mut self.buffers[stream]
    }
}

impl<'a> IntoIterator for &'a BufferArray {
    type Item = &'a RecordBuffer;
    type IntoIter = std::slice::Iter<'a, RecordBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffers.iter()
    }
}

impl<'a> IntoIterator for &'a mut BufferArray {
    type Item = &'a mut RecordBuffer;
    type IntoIter = std::slice::IterMut<'a, RecordBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.buffers.iter_mut()
    }
}
