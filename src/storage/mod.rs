//! Storage Module
//!
//! Persistent storage layer using immutable sorted tables.
//!
//! ## Responsibilities
//! - Persist data to disk in sorted format
//! - Efficient range scans and point lookups
//! - Compaction: merge tables, drop shadowed versions and tombstones
//!
//! Table layout is documented in [`sstable`]. Tables are named
//! `sstable_{id:06}.sst`; a higher id always holds newer data.

pub mod sstable;
mod manager;
mod merge;

pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
pub use manager::StorageManager;
pub(crate) use manager::sync_dir;
pub use merge::{EntrySource, MergeIterator};
