//! Streaming record store
//!
//! Owns the append buffer, assigns sequences, and maintains the bidirectional
//! sequence <-> offset maps plus per-file-id record-info vectors for O(1)
//! indexed iteration.
//!
//! Stream format:
//! ```text
//! +-----------------+------------------+-----------------+----
//! | size: u32 LE    | payload (size B) | size: u32 LE    | ...
//! +-----------------+------------------+-----------------+----
//!
//! payload[0..4]  root offset of the embedded record (opaque)
//! payload[4..8]  file identifier (4 ASCII bytes, zero-padded)
//! payload[8..]   remainder (opaque)
//! ```

use crate::data::FileId;
use crate::{Result, StreamError};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Offset/sequence pair tracked per file id, in ingest order.
/// Cursors iterate these vectors directly instead of scanning the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub offset: u64,
    pub sequence: u64,
}

/// A materialised record read back from the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRecord {
    pub sequence: u64,
    pub file_id: FileId,
    /// Absolute offset of the size prefix in the log
    pub offset: u64,
    pub length: u32,
    pub data: Vec<u8>,
}

/// Shared handle to a per-file-id record-info vector
pub type RecordInfoVec = Arc<RwLock<Vec<RecordInfo>>>;

/// Streaming append-only store.
///
/// Records are appended, never mutated; logical deletion happens above this
/// layer via tombstones. Sequences start at 1 and are strictly monotonic.
pub struct StreamingStore {
    buffer: Vec<u8>,
    write_offset: u64,
    next_sequence: u64,
    record_count: u64,
    sequence_to_offset: AHashMap<u64, u64>,
    offset_to_sequence: AHashMap<u64, u64>,
    record_infos: AHashMap<FileId, RecordInfoVec>,
}

impl StreamingStore {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            write_offset: 0,
            next_sequence: 1,
            record_count: 0,
            sequence_to_offset: AHashMap::new(),
            offset_to_sequence: AHashMap::new(),
            record_infos: AHashMap::new(),
        }
    }

    /// Append a bare payload, writing the 4-byte LE size prefix ourselves.
    /// Returns (offset of the size prefix, assigned sequence, file id).
    fn append_framed(&mut self, payload: &[u8]) -> (u64, u64, FileId) {
        let offset = self.write_offset;
        let size = payload.len() as u32;
        self.buffer.extend_from_slice(&size.to_le_bytes());
        self.buffer.extend_from_slice(payload);
        self.write_offset += 4 + payload.len() as u64;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.record_count += 1;
        self.sequence_to_offset.insert(sequence, offset);
        self.offset_to_sequence.insert(offset, sequence);

        let file_id = FileId::extract(payload);
        self.record_infos
            .entry(file_id)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .write()
            .push(RecordInfo { offset, sequence });

        (offset, sequence, file_id)
    }

    /// Stream raw size-prefixed records.
    ///
    /// Walks `bytes` as `[u32 size LE][payload]*`, appending every complete
    /// record and invoking `cb(file_id, payload, sequence, offset)` for each.
    /// Stops at the first incomplete record and returns the number of bytes
    /// consumed so the caller can resume with the tail, plus the number of
    /// records produced.
    pub fn ingest(
        &mut self,
        bytes: &[u8],
        mut cb: impl FnMut(FileId, &[u8], u64, u64),
    ) -> (usize, u64) {
        let mut pos = 0usize;
        let mut records = 0u64;

        while bytes.len() - pos >= 4 {
            let size = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            if bytes.len() - pos - 4 < size {
                break;
            }
            let payload = &bytes[pos + 4..pos + 4 + size];
            let (offset, sequence, file_id) = self.append_framed(payload);
            cb(file_id, payload, sequence, offset);
            pos += 4 + size;
            records += 1;
        }

        (pos, records)
    }

    /// Ingest a single framed record. The frame must be complete.
    pub fn ingest_one_framed(
        &mut self,
        bytes: &[u8],
        mut cb: impl FnMut(FileId, &[u8], u64, u64),
    ) -> Result<u64> {
        if bytes.len() < 4 {
            return Err(StreamError::TruncatedFrame {
                needed: 4,
                available: bytes.len(),
            });
        }
        let size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < size + 4 {
            return Err(StreamError::TruncatedFrame {
                needed: size + 4,
                available: bytes.len(),
            });
        }
        let payload = &bytes[4..4 + size];
        let (offset, sequence, file_id) = self.append_framed(payload);
        cb(file_id, payload, sequence, offset);
        Ok(sequence)
    }

    /// Ingest an unframed payload; the store writes its own size prefix.
    pub fn ingest_bare(
        &mut self,
        payload: &[u8],
        mut cb: impl FnMut(FileId, &[u8], u64, u64),
    ) -> u64 {
        let (offset, sequence, file_id) = self.append_framed(payload);
        cb(file_id, payload, sequence, offset);
        sequence
    }

    /// Replace the store contents with `bytes` and re-issue the ingest
    /// callback for every record. A truncated trailing record is discarded
    /// silently.
    pub fn load_and_rebuild(&mut self, bytes: &[u8], cb: impl FnMut(FileId, &[u8], u64, u64)) {
        self.buffer.clear();
        self.write_offset = 0;
        self.next_sequence = 1;
        self.record_count = 0;
        self.sequence_to_offset.clear();
        self.offset_to_sequence.clear();
        self.record_infos.clear();

        self.ingest(bytes, cb);
    }

    /// Payload bytes of the record whose size prefix sits at `offset`.
    ///
    /// Only known record starts resolve; a misaligned offset would read a
    /// bogus size prefix out of the middle of some record.
    pub fn data_at_offset(&self, offset: u64) -> Result<&[u8]> {
        if !self.offset_to_sequence.contains_key(&offset) {
            return Err(StreamError::InvalidOffset(offset));
        }
        let start = offset as usize;
        let size = u32::from_le_bytes(self.buffer[start..start + 4].try_into().unwrap()) as u64;
        if offset + 4 + size > self.write_offset {
            return Err(StreamError::InvalidOffset(offset));
        }
        Ok(&self.buffer[start + 4..start + 4 + size as usize])
    }

    pub fn offset_for_sequence(&self, sequence: u64) -> Option<u64> {
        self.sequence_to_offset.get(&sequence).copied()
    }

    pub fn sequence_for_offset(&self, offset: u64) -> Option<u64> {
        self.offset_to_sequence.get(&offset).copied()
    }

    pub fn has_record(&self, sequence: u64) -> bool {
        self.sequence_to_offset.contains_key(&sequence)
    }

    /// Materialise a record by sequence (copies the payload).
    pub fn read_record(&self, sequence: u64) -> Option<StoredRecord> {
        let offset = self.offset_for_sequence(sequence)?;
        let data = self.data_at_offset(offset).ok()?;
        Some(StoredRecord {
            sequence,
            file_id: FileId::extract(data),
            offset,
            length: data.len() as u32,
            data: data.to_vec(),
        })
    }

    /// Walk every record in ingest order. The callback returns `false` to
    /// stop early.
    pub fn iterate_records(&self, mut cb: impl FnMut(FileId, &[u8], u64, u64) -> bool) {
        let mut pos = 0u64;
        while pos < self.write_offset {
            let data = match self.data_at_offset(pos) {
                Ok(d) => d,
                Err(_) => return,
            };
            let sequence = match self.sequence_for_offset(pos) {
                Some(s) => s,
                None => return,
            };
            if !cb(FileId::extract(data), data, sequence, pos) {
                return;
            }
            pos += 4 + data.len() as u64;
        }
    }

    /// Walk the records carrying `file_id`, in ingest order. O(n_matching)
    /// via the cached record-info vector.
    pub fn iterate_by_file_id(
        &self,
        file_id: FileId,
        mut cb: impl FnMut(&[u8], u64, u64) -> bool,
    ) {
        let infos = match self.record_infos.get(&file_id) {
            Some(v) => v.clone(),
            None => return,
        };
        for info in infos.read().iter() {
            let data = match self.data_at_offset(info.offset) {
                Ok(d) => d,
                Err(_) => return,
            };
            if !cb(data, info.sequence, info.offset) {
                return;
            }
        }
    }

    /// Shared handle to the record-info vector for `file_id`, if any record
    /// with that id has been ingested.
    pub fn record_info_vector(&self, file_id: FileId) -> Option<RecordInfoVec> {
        self.record_infos.get(&file_id).cloned()
    }

    /// Copy of the live log prefix; identical to the concatenation of all
    /// framed records.
    pub fn export(&self) -> Vec<u8> {
        self.buffer[..self.write_offset as usize].to_vec()
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn data_size(&self) -> u64 {
        self.write_offset
    }
}

impl Default for StreamingStore {
    fn default() -> Self {
        Self::new()
    }
}
