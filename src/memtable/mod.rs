//! MemTable
//!
//! Ordered in-memory buffer for writes that are in the WAL but not yet in
//! an SSTable. Deletes are kept as tombstones so they shadow older values
//! on disk until a compaction drops them.
//!
//! Backed by a `BTreeMap` behind a `parking_lot::RwLock`. Each entry keeps
//! the LSN of its write, so concurrent committers can land in any order.

mod table;

pub use table::MemTable;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// Bytes of value payload (0 for a tombstone)
    pub fn value_len(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }

    /// Convert to the `Option` form used by SSTables (None = tombstone)
    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }
}
