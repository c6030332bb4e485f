//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from MemTable flushes
//! - Merge SSTables together (compaction)

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StrataError};
use crate::memtable::{MemTable, MemTableEntry};

use super::merge::{EntrySource, MergeIterator};
use super::sstable::{parse_sstable_id, sstable_file_name, TEMP_EXTENSION};
use super::{SSTable, SSTableBuilder, SSTableReader};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: RwLock over a list of shared readers. Point lookups clone
///   the list and release the lock before touching disk.
/// - `next_sstable_id`: Atomic counter (lock-free)
/// - `compaction_lock`: at most one compaction at a time
/// - All methods use `&self`
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<Arc<SSTableReader>>>,

    /// Next ID for creating new SSTables (atomic, lock-free)
    next_sstable_id: AtomicU64,

    compaction_lock: Mutex<()>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove unfinished compaction output
    /// 3. Open readers for each SSTable (verifies checksums, loads indexes)
    /// 4. Drop tables already superseded by a compacted table
    /// 5. Order by ID descending (newest first)
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstables = Vec::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }

            let name = file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if name.ends_with(TEMP_EXTENSION) {
                tracing::warn!("Removing unfinished compaction output {}", file_path.display());
                fs::remove_file(&file_path)?;
                continue;
            }

            if parse_sstable_id(&file_path).is_some() {
                sstables.push(Arc::new(SSTableReader::open(&file_path)?));
            }
        }

        // Sort newest first (highest ID first)
        sstables.sort_by(|a, b| b.id().cmp(&a.id()));

        let sstables = Self::remove_superseded(sstables)?;

        // Next ID = max + 1, or 1 if no SSTables exist
        let next_id = sstables.first().map(|t| t.id() + 1).unwrap_or(1);

        tracing::debug!(
            "Storage opened at {} with {} SSTables",
            path.display(),
            sstables.len()
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(next_id),
            compaction_lock: Mutex::new(()),
        })
    }

    /// Delete tables whose ids fall inside a compacted table's coverage
    ///
    /// Leftovers of a compaction interrupted after its output was installed.
    fn remove_superseded(sstables: Vec<Arc<SSTableReader>>) -> Result<Vec<Arc<SSTableReader>>> {
        let ranges: Vec<(u64, u64)> = sstables
            .iter()
            .filter(|t| t.base_id() > 0)
            .map(|t| (t.base_id(), t.id()))
            .collect();

        let mut live = Vec::with_capacity(sstables.len());
        for table in sstables {
            let stale = ranges
                .iter()
                .any(|&(base, id)| table.id() >= base && table.id() < id);
            if stale {
                let path = table.path();
                tracing::warn!("Removing superseded SSTable {}", path.display());
                drop(table);
                fs::remove_file(&path)?;
            } else {
                live.push(table);
            }
        }
        Ok(live)
    }

    /// Get a value by key (searches all SSTables newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key not found, or found tombstone (deleted)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sstables = self.sstables.read().clone();

        for reader in sstables.iter() {
            // Skip SSTable if key is outside its range (O(1) check)
            if !reader.might_contain(key) {
                continue;
            }

            match reader.get(key) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => return Ok(None),
                Err(StrataError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Flush a frozen MemTable to a new SSTable
    ///
    /// Streams the table's sorted entries into a new file without copying
    /// them, opens a reader for it and adds it to the front of the list.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(StrataError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let mut builder = SSTableBuilder::new(&path)?;
        memtable.for_each(|key, entry| match entry {
            MemTableEntry::Value(v) => builder.add(key, v),
            MemTableEntry::Tombstone => builder.add_tombstone(key),
        })?;
        let metadata = builder.finish()?;
        sync_dir(&self.data_dir);

        let reader = Arc::new(SSTableReader::open(&path)?);
        self.sstables.write().insert(0, reader);

        tracing::info!(
            "Flushed {} entries to {} ({} bytes)",
            metadata.entry_count,
            path.display(),
            metadata.file_size
        );

        Ok(metadata)
    }

    /// Open ranged iterators over every SSTable, newest first
    ///
    /// Files are opened while the table list is locked, so a concurrent
    /// compaction cannot remove them underneath the scan.
    pub fn range_sources(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<EntrySource>> {
        let sstables = self.sstables.read();
        let mut sources: Vec<EntrySource> = Vec::with_capacity(sstables.len());
        for reader in sstables.iter() {
            let past_end = matches!(
                (reader.min_key(), end),
                (Some(min), Some(end)) if min >= end
            );
            let before_start = matches!(reader.max_key(), Some(max) if max < start);
            if reader.entry_count() == 0 || past_end || before_start {
                continue;
            }
            sources.push(Box::new(reader.range(start, end)?));
        }
        Ok(sources)
    }

    /// Merge every current SSTable into one
    ///
    /// Shadowed versions and tombstones are dropped: the inputs are all the
    /// tables there are, so nothing older can be uncovered. The output takes
    /// the id of the newest input and records the oldest covered id as its
    /// base, so a crash at any point leaves a readable directory.
    ///
    /// Returns `None` when there is nothing to merge.
    pub fn compact(&self) -> Result<Option<SSTable>> {
        let _guard = self.compaction_lock.lock();

        let inputs = self.sstables.read().clone();
        if inputs.len() < 2 {
            return Ok(None);
        }

        let output_id = inputs[0].id();
        let base_id = inputs
            .iter()
            .map(|t| t.covers_from())
            .min()
            .unwrap_or(output_id);
        let final_path = self.sstable_path(output_id);
        let temp_path = self
            .data_dir
            .join(format!("{}.tmp", sstable_file_name(output_id)));

        tracing::info!(
            "Compacting {} SSTables into {} (covers ids {}..={})",
            inputs.len(),
            final_path.display(),
            base_id,
            output_id
        );

        let mut sources: Vec<EntrySource> = Vec::with_capacity(inputs.len());
        for reader in &inputs {
            sources.push(Box::new(reader.iter()?));
        }

        let mut builder = SSTableBuilder::with_base(&temp_path, base_id)?;
        for item in MergeIterator::new(sources) {
            let (key, value) = item?;
            builder.add(&key, &value)?;
        }
        let metadata = builder.finish()?;
        let compacted = Arc::new(SSTableReader::open(&temp_path)?);

        let input_ids: HashSet<u64> = inputs.iter().map(|t| t.id()).collect();
        {
            let mut sstables = self.sstables.write();
            fs::rename(&temp_path, &final_path)?;
            compacted.set_path(&final_path);
            sstables.retain(|t| !input_ids.contains(&t.id()));
            sstables.push(Arc::clone(&compacted));
        }
        sync_dir(&self.data_dir);

        for reader in inputs.iter().filter(|t| t.id() != output_id) {
            let path = reader.path();
            if let Err(e) = fs::remove_file(&path) {
                // Cleaned up by the superseded check on next open
                tracing::warn!("Failed to remove compacted input {}: {}", path.display(), e);
            }
        }

        let reclaimed: u64 = inputs.iter().map(|t| t.entry_count()).sum::<u64>()
            - metadata.entry_count;
        tracing::info!(
            "Compaction finished: {} entries kept, {} dropped",
            metadata.entry_count,
            reclaimed
        );

        Ok(Some(SSTable {
            path: final_path,
            ..metadata
        }))
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Ids of the live SSTables, newest first
    pub fn sstable_ids(&self) -> Vec<u64> {
        self.sstables.read().iter().map(|t| t.id()).collect()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Generate the file path for an SSTable with given ID
    fn sstable_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(sstable_file_name(id))
    }
}

/// Persist directory entries (new files, renames). Best effort: not every
/// platform can open a directory for syncing.
pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}
