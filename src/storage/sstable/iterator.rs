//! SSTable Iterator
//!
//! Sequential iteration over the entries of an SSTable, optionally bounded
//! to a key range.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StrataError};

use super::TOMBSTONE_MARKER;

/// Bytes pulled from the file per refill
const READ_CHUNK: u64 = 64 * 1024;

/// Iterator over SSTable entries in sorted key order
///
/// Reads through the handle its reader opened, never by path, so it keeps
/// seeing the same file even after compaction renames a new table over it.
/// Each refill seeks under the handle's lock; the iterator tracks its own
/// position.
pub struct SSTableIterator {
    file: Arc<Mutex<File>>,
    /// Buffered window of the data block
    buf: Vec<u8>,
    /// File offset of `buf[0]`
    buf_offset: u64,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Offset of the next entry
    current_offset: u64,
    /// Exclusive upper key bound
    upper: Option<Vec<u8>>,
    done: bool,
}

impl SSTableIterator {
    pub(super) fn new(
        file: Arc<Mutex<File>>,
        start_offset: u64,
        end_offset: u64,
        upper: Option<Vec<u8>>,
    ) -> Self {
        Self {
            file,
            buf: Vec::new(),
            buf_offset: start_offset,
            end_offset,
            current_offset: start_offset,
            upper,
            done: start_offset >= end_offset,
        }
    }

    /// The `len` bytes at `current_offset`; callers keep `len` inside the data block
    fn window(&mut self, len: u64) -> Result<&[u8]> {
        let start = self.current_offset;
        let buffered_end = self.buf_offset + self.buf.len() as u64;
        if start < self.buf_offset || start + len > buffered_end {
            let want = len.max(READ_CHUNK).min(self.end_offset - start);
            self.buf.resize(want as usize, 0);
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut self.buf)?;
            self.buf_offset = start;
        }
        let from = (start - self.buf_offset) as usize;
        Ok(&self.buf[from..from + len as usize])
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let remaining = self.end_offset - self.current_offset;
        if remaining < 8 {
            return Err(self.overrun());
        }

        let header = self.window(8)?;
        let key_len = u32::from_le_bytes(header[0..4].try_into().expect("4-byte slice")) as u64;
        let val_len = u32::from_le_bytes(header[4..8].try_into().expect("4-byte slice"));

        let tombstone = val_len == TOMBSTONE_MARKER;
        let entry_size = 8 + key_len + if tombstone { 0 } else { val_len as u64 };
        if entry_size > remaining {
            return Err(self.overrun());
        }

        let entry = self.window(entry_size)?;
        let key = entry[8..8 + key_len as usize].to_vec();
        let value = (!tombstone).then(|| entry[8 + key_len as usize..].to_vec());

        self.current_offset += entry_size;
        Ok((key, value))
    }

    fn overrun(&self) -> StrataError {
        StrataError::Storage(format!(
            "SSTable entry at offset {} overruns data block",
            self.current_offset
        ))
    }
}

impl Iterator for SSTableIterator {
    /// (key, Option<value>): None value means tombstone
    type Item = Result<(Vec<u8>, Option<Vec<u8>>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.current_offset >= self.end_offset {
            return None;
        }

        match self.read_entry() {
            Ok((key, value)) => {
                if matches!(&self.upper, Some(upper) if key.as_slice() >= upper.as_slice()) {
                    self.done = true;
                    return None;
                }
                Some(Ok((key, value)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
