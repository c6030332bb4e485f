//! Merge Iterator
//!
//! K-way merge of sorted entry sources into one sorted, de-duplicated,
//! tombstone-free stream. Used by range scans (memtable + SSTables) and by
//! compaction (SSTables only).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, StrataError};

/// A sorted source of `(key, Option<value>)`; `None` marks a tombstone
pub type EntrySource = Box<dyn Iterator<Item = Result<(Vec<u8>, Option<Vec<u8>>)>> + Send>;

struct HeapItem {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    /// Position in the source list; lower = newer
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    /// Reversed so the max-heap pops the smallest key, newest source first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted sources ordered newest → oldest
///
/// For every key only the entry from the newest source is considered; if
/// that entry is a tombstone the key is skipped entirely. Yields
/// `(key, value)` in ascending key order. A source error is yielded once,
/// after the entries already known to be correct, and ends the stream.
pub struct MergeIterator {
    sources: Vec<EntrySource>,
    heap: BinaryHeap<HeapItem>,
    pending_error: Option<StrataError>,
    done: bool,
}

impl MergeIterator {
    /// Build the merge; `sources[0]` has the highest priority
    pub fn new(sources: Vec<EntrySource>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            done: false,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source);
        }
        merge
    }

    /// Pull the next entry of `source` into the heap
    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok((key, value))) => self.heap.push(HeapItem { key, value, source }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(e) = self.pending_error.take() {
                self.done = true;
                return Some(Err(e));
            }

            let top = match self.heap.pop() {
                Some(item) => item,
                None => {
                    self.done = true;
                    return None;
                }
            };
            self.advance(top.source);

            // Older versions of the same key are shadowed
            while matches!(self.heap.peek(), Some(next) if next.key == top.key) {
                if let Some(shadowed) = self.heap.pop() {
                    self.advance(shadowed.source);
                }
            }

            if let Some(value) = top.value {
                return Some(Ok((top.key, value)));
            }
        }
    }
}
