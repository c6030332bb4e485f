//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::{WalEntry, HEADER_SIZE};

/// Reads entries from the WAL file
///
/// A torn tail (partial header or partial payload, as left by a crash in the
/// middle of an append) reads as end-of-log. A complete entry whose checksum
/// does not match is reported as `WalCorruption`.
pub struct WalReader {
    reader: BufReader<File>,
    /// Byte offset just past the last entry returned
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at end of log, including a torn final entry.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        if !read_full(&mut self.reader, &mut header)? {
            return Ok(None);
        }

        let (_, _, len) = WalEntry::decode_header(&header)?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + len);
        buf.extend_from_slice(&header);
        buf.resize(HEADER_SIZE + len, 0);
        if !read_full(&mut self.reader, &mut buf[HEADER_SIZE..])? {
            return Ok(None);
        }

        let entry = WalEntry::deserialize(&buf)?;
        self.position += buf.len() as u64;
        Ok(Some(entry))
    }

    /// Byte offset just past the last successfully read entry
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Fill `buf` completely; `Ok(false)` if the file ends first
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Iterator over WAL entries
///
/// Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
