//! SSTable Builder
//!
//! Streams sorted entries into a new table file. The header goes out first
//! with a zero entry count; `finish` appends the index and footer, patches
//! the count and syncs the file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};

use super::{SSTable, COUNT_OFFSET, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

pub struct SSTableBuilder {
    path: PathBuf,
    out: BufWriter<File>,
    /// Offset the next entry will be written at
    offset: u64,
    /// `(key, entry offset)` in write order, which is key order
    index: Vec<(Vec<u8>, u64)>,
    /// Checksum over the data block only
    crc: crc32fast::Hasher,
}

impl SSTableBuilder {
    /// Start a table produced by a memtable flush
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_base(path, 0)
    }

    /// Start a compaction output that supersedes ids `[base_id, own id)`
    pub fn with_base(path: &Path, base_id: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&base_id.to_le_bytes());

        let mut out = BufWriter::new(file);
        out.write_all(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            offset: HEADER_SIZE,
            index: Vec::new(),
            crc: crc32fast::Hasher::new(),
        })
    }

    /// Append a live value; keys must arrive strictly ascending
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() >= TOMBSTONE_MARKER as usize {
            return Err(StrataError::Storage(format!(
                "value of {} bytes does not fit an SSTable entry",
                value.len()
            )));
        }
        self.append(key, Some(value))
    }

    /// Append a deletion marker; keys must arrive strictly ascending
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.append(key, None)
    }

    fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(StrataError::Storage(format!(
                    "SSTable keys out of order: {:?} after {:?}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        let value_len = value.map_or(TOMBSTONE_MARKER, |v| v.len() as u32);
        let mut lengths = [0u8; 8];
        lengths[..4].copy_from_slice(&(key.len() as u32).to_le_bytes());
        lengths[4..].copy_from_slice(&value_len.to_le_bytes());

        let value = value.unwrap_or_default();
        for part in [&lengths[..], key, value] {
            self.out.write_all(part)?;
            self.crc.update(part);
        }

        self.index.push((key.to_vec(), self.offset));
        self.offset += (lengths.len() + key.len() + value.len()) as u64;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.index.len() as u64
    }

    /// Write index and footer, fix up the header and fsync
    pub fn finish(self) -> Result<SSTable> {
        let Self {
            path,
            mut out,
            offset: index_offset,
            index,
            crc,
        } = self;

        for (key, entry_offset) in &index {
            out.write_all(&(key.len() as u32).to_le_bytes())?;
            out.write_all(&entry_offset.to_le_bytes())?;
            out.write_all(key)?;
        }

        // index offset, data CRC, 4 bytes reserved
        out.write_all(&index_offset.to_le_bytes())?;
        out.write_all(&crc.finalize().to_le_bytes())?;
        out.write_all(&[0u8; 4])?;

        let mut file = out
            .into_inner()
            .map_err(|e| StrataError::Storage(format!("Failed to flush SSTable: {}", e.error())))?;

        let entry_count = index.len() as u64;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&entry_count.to_le_bytes())?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();

        let mut keys = index.into_iter().map(|(key, _)| key);
        let min_key = keys.next().unwrap_or_default();
        let max_key = keys.last().unwrap_or_else(|| min_key.clone());

        Ok(SSTable {
            path,
            entry_count,
            min_key,
            max_key,
            file_size,
        })
    }
}
