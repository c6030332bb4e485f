//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                       │
//! │   Magic: "STKV" (4) | Version: u16 (2) | Count: u64 (8) │
//! │   BaseId: u64 (8)                                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry ...                       │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! │   ... repeated for each entry ...                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Padding (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `BaseId` is non-zero only for compaction output: such a table supersedes
//! every table whose id lies in `[BaseId, own id)`.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a StrataKV SSTable file
pub(crate) const MAGIC: &[u8; 4] = b"STKV";

/// Current SSTable format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) + BaseId (8) = 22 bytes
pub(crate) const HEADER_SIZE: u64 = 22;

/// Offset of the entry count inside the header
pub(crate) const COUNT_OFFSET: u64 = 6;

/// Footer size: IndexOffset (8) + DataCRC (4) + Padding (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// File name prefix shared by every table
pub(crate) const FILE_PREFIX: &str = "sstable_";

/// Extension of finished tables
pub(crate) const FILE_EXTENSION: &str = "sst";

/// Extension of compaction output that has not been installed yet
pub(crate) const TEMP_EXTENSION: &str = "sst.tmp";

/// Table file name for an id: `sstable_000042.sst`
pub fn sstable_file_name(id: u64) -> String {
    format!("{}{:06}.{}", FILE_PREFIX, id, FILE_EXTENSION)
}

/// Parse the table id out of a file name
/// "sstable_000042.sst" → Some(42), "sstable_000042.sst.tmp" → Some(42)
pub fn parse_sstable_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('.') {
        return None;
    }
    digits.parse().ok()
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// SSTable metadata, returned when a table is written
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the SSTable file
    pub path: PathBuf,
    /// Number of entries in this SSTable
    pub entry_count: u64,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}
