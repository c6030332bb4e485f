//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StrataError};

use super::iterator::SSTableIterator;
use super::{parse_sstable_id, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Reader for SSTable files with in-memory index for O(log n) lookups
///
/// Lookups and iterators share one file handle behind a mutex, so a shared
/// `&SSTableReader` serves concurrent readers. The handle is opened once:
/// a table renamed or unlinked by compaction stays readable for as long as
/// someone holds its reader.
pub struct SSTableReader {
    /// Table id parsed from the file name (0 if the name has none)
    id: u64,
    /// Lowest id this table supersedes (0 = none)
    base_id: u64,
    /// Current location of the file
    path: Mutex<PathBuf>,
    /// Handle shared by point lookups and iterators
    file: Arc<Mutex<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// Index block starting offset (end of data)
    index_offset: u64,
    file_size: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Validates header and footer, verifies the data block checksum and
    /// loads the entire index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(path, format!("file too small ({} bytes)", file_size)));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(corrupt(path, format!("invalid magic {:?}", &header[0..4])));
        }

        let version = u16::from_le_bytes(header[4..6].try_into().expect("2-byte slice"));
        if version != VERSION {
            return Err(corrupt(path, format!("unsupported version {}", version)));
        }

        let entry_count = u64::from_le_bytes(header[6..14].try_into().expect("8-byte slice"));
        let base_id = u64::from_le_bytes(header[14..22].try_into().expect("8-byte slice"));

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = u64::from_le_bytes(footer[0..8].try_into().expect("8-byte slice"));
        let data_crc = u32::from_le_bytes(footer[8..12].try_into().expect("4-byte slice"));

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt(path, format!("index offset {} out of bounds", index_offset)));
        }

        // Verify the data block in fixed-size chunks
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.read_exact(&mut chunk[..n])?;
            hasher.update(&chunk[..n]);
            remaining -= n as u64;
        }
        let actual_crc = hasher.finalize();
        if actual_crc != data_crc {
            return Err(corrupt(
                path,
                format!("data CRC mismatch: stored {:08x}, computed {:08x}", data_crc, actual_crc),
            ));
        }

        // Index block sits between data and footer; the file cursor is there now
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        // [key_len(4)][offset(8)][key]
        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < index_data.len() {
            if pos + 12 > index_data.len() {
                return Err(corrupt(path, "truncated index entry".to_string()));
            }
            let key_len =
                u32::from_le_bytes(index_data[pos..pos + 4].try_into().expect("4-byte slice"))
                    as usize;
            let offset =
                u64::from_le_bytes(index_data[pos + 4..pos + 12].try_into().expect("8-byte slice"));
            pos += 12;

            if pos + key_len > index_data.len() || offset >= index_offset {
                return Err(corrupt(path, "malformed index entry".to_string()));
            }
            index.insert(index_data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }

        if index.len() as u64 != entry_count {
            return Err(corrupt(
                path,
                format!("index holds {} keys, header says {}", index.len(), entry_count),
            ));
        }

        Ok(Self {
            id: parse_sstable_id(path).unwrap_or(0),
            base_id,
            path: Mutex::new(path.to_path_buf()),
            file: Arc::new(Mutex::new(file)),
            index,
            entry_count,
            index_offset,
            file_size,
        })
    }

    /// Get a value by key: O(log n) lookup via in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)`: key not in this SSTable
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Err(StrataError::KeyNotFound),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;

        let key_len = u32::from_le_bytes(header[0..4].try_into().expect("4-byte slice")) as usize;
        let val_len = u32::from_le_bytes(header[4..8].try_into().expect("4-byte slice"));

        // Skip the key (we already know it matches)
        file.seek(SeekFrom::Current(key_len as i64))?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(None);
        }

        if offset + 8 + key_len as u64 + val_len as u64 > self.index_offset {
            return Err(StrataError::Storage(format!(
                "entry at offset {} overruns data block",
                offset
            )));
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn base_id(&self) -> u64 {
        self.base_id
    }

    /// Lowest table id whose contents this table accounts for
    pub fn covers_from(&self) -> u64 {
        if self.base_id > 0 {
            self.base_id
        } else {
            self.id
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    /// Record that the file was renamed; the open handle follows the inode
    pub(crate) fn set_path(&self, path: &Path) {
        *self.path.lock() = path.to_path_buf();
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Iterate over every entry (compaction, debugging)
    pub fn iter(&self) -> Result<SSTableIterator> {
        Ok(SSTableIterator::new(
            Arc::clone(&self.file),
            HEADER_SIZE,
            self.index_offset,
            None,
        ))
    }

    /// Iterate over entries with `start <= key < end` (`end = None` is unbounded)
    pub fn range(&self, start: &[u8], end: Option<&[u8]>) -> Result<SSTableIterator> {
        let first = self
            .index
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .next()
            .map(|(_, &offset)| offset)
            .unwrap_or(self.index_offset);

        Ok(SSTableIterator::new(
            Arc::clone(&self.file),
            first,
            self.index_offset,
            end.map(|e| e.to_vec()),
        ))
    }
}

fn corrupt(path: &Path, reason: String) -> StrataError {
    StrataError::Storage(format!("corrupt SSTable {}: {}", path.display(), reason))
}
