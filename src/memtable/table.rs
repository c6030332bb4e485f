//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::Result;

use super::MemTableEntry;

/// A stored entry plus the LSN of the write that produced it
type Versioned = (u64, MemTableEntry);

/// In-memory table for recent writes
///
/// `size` approximates heap usage as the sum of key and value lengths;
/// a tombstone counts only its key.
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, Versioned>>,
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get a value by key (read lock)
    ///
    /// `None` means the memtable knows nothing about the key; a delete is
    /// returned as `Some(MemTableEntry::Tombstone)`.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).map(|(_, entry)| entry.clone())
    }

    /// Put a key-value pair, returning the new size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.apply(0, key, MemTableEntry::Value(value))
    }

    /// Delete a key (inserts a tombstone), returning the new size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        self.apply(0, key, MemTableEntry::Tombstone)
    }

    /// Record the write logged at `lsn`, returning the new size
    ///
    /// Writers commit concurrently and may reach the table out of log
    /// order. An entry only replaces one with an equal or lower LSN, so the
    /// table always ends up holding the last logged write for each key.
    pub fn apply(&self, lsn: u64, key: Vec<u8>, entry: MemTableEntry) -> usize {
        let mut data = self.data.write();
        let current = self.size.load(Ordering::Relaxed);

        let new_size = match data.get_mut(&key) {
            Some((seen, _)) if *seen > lsn => return current,
            Some(slot) => {
                let old = std::mem::replace(slot, (lsn, entry));
                current + slot.1.value_len() - old.1.value_len()
            }
            None => {
                let added = key.len() + entry.value_len();
                data.insert(key, (lsn, entry));
                current + added
            }
        };
        // Stored while the write lock is held, so updates never interleave.
        self.size.store(new_size, Ordering::Relaxed);
        new_size
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Visit every entry in sorted key order without copying the table
    ///
    /// Holds the read lock for the whole walk; meant for tables that no
    /// longer take writes. Stops at the first error `f` returns.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &MemTableEntry) -> Result<()>,
    {
        for (key, (_, entry)) in self.data.read().iter() {
            f(key, entry)?;
        }
        Ok(())
    }

    /// Copy of entries with `start <= key < end` in sorted key order
    ///
    /// `end = None` is unbounded. Tombstones are included so a scan can
    /// shadow older values.
    pub fn range(&self, start: &[u8], end: Option<&[u8]>) -> Vec<(Vec<u8>, MemTableEntry)> {
        if matches!(end, Some(end) if end <= start) {
            return Vec::new();
        }
        let upper = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.data
            .read()
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, (_, v))| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
