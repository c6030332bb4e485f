//! Storage engine
//!
//! Owns the WAL, the memtables and the SSTable set for one data directory.
//!
//! ```text
//! <data_dir>/
//!   wal_000007.log        writes of the active memtable
//!   wal_000006.log        writes of a frozen memtable still being flushed
//!   sstables/
//!     sstable_000001.sst  one file per flush or compaction
//! ```

use std::fs;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{EntrySource, MergeIterator, StorageManager};
use crate::wal::{CommitLog, Operation};

/// How long a stalled writer sleeps before re-checking for room
const STALL_POLL: Duration = Duration::from_millis(50);

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (put/delete): run concurrently under a shared commit gate
///   - Append to the WAL (short lock), then group-commit the fsync
///   - Insert into the active memtable; entries carry their LSN, so the
///     table keeps the last logged write per key whatever the arrival order
///   - A full memtable is frozen in O(1): the gate is taken exclusively,
///     the WAL moves to a new segment and a fresh table takes over
///
/// - **Flushes**: a background thread writes the frozen table to an SSTable
///   and deletes its WAL segment. Writers only wait when the next table
///   fills up before the previous flush is done.
///
/// - **Reads** (get/scan): never take the gate
///   - Active table, then the frozen one, then SSTables newest first
///
/// ## Failure Model
/// A failure on the write path (WAL append/fsync, flush) halts the engine:
/// further writes are refused with `EngineUnavailable`, reads keep working.
pub struct Engine {
    shared: Arc<Shared>,

    /// Directory for all data files (SSTables)
    storage_dir: PathBuf,

    /// Wakes the flush thread
    flush_tx: Option<Sender<()>>,

    flusher: Option<JoinHandle<()>>,
    compactor: Option<JoinHandle<()>>,
}

/// State shared with the flush thread
struct Shared {
    config: Config,

    wal: CommitLog,

    /// Held shared by every write from WAL append to memtable insert, and
    /// exclusively while the active table and WAL segment are swapped
    commit_gate: RwLock<()>,

    memtables: RwLock<Memtables>,

    /// Persistent storage manager, shared with the compaction thread
    storage: Arc<StorageManager>,

    /// Reason the engine stopped accepting writes
    halted: RwLock<Option<String>>,

    /// One flush at a time, background or explicit
    flush_lock: Mutex<()>,

    /// Signalled when a frozen table leaves memory
    room: Condvar,
    room_lock: Mutex<()>,

    /// Wakes the compaction thread; taken on shutdown
    compaction_tx: Mutex<Option<Sender<()>>>,
}

struct Memtables {
    /// Takes writes; its WAL segment is the one taking appends
    active: Arc<MemTable>,
    /// Waiting for (or in) its flush
    frozen: Option<Frozen>,
}

#[derive(Clone)]
struct Frozen {
    /// WAL segment holding this table's writes
    segment: u64,
    table: Arc<MemTable>,
}

impl Engine {
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load existing SSTables (checksums verified)
    /// 3. Replay every WAL segment, flush the result, delete the segments
    /// 4. Start the flush and compaction threads
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);

        let storage = StorageManager::open(&storage_dir).map_err(|e| match e {
            StrataError::Storage(reason) => StrataError::EngineUnavailable(reason),
            other => other,
        })?;
        let storage = Arc::new(storage);

        let replayed = CommitLog::replay(&config.data_dir)?;
        let recovered = MemTable::new();
        for entry in replayed.entries {
            let (key, value) = match entry.operation {
                Operation::Put { key, value } => (key, MemTableEntry::Value(value)),
                Operation::Delete { key } => (key, MemTableEntry::Tombstone),
            };
            recovered.apply(entry.lsn, key, value);
        }

        // Recovered data goes to an SSTable before any segment is dropped
        if !recovered.is_empty() {
            tracing::info!(
                "Flushing {} recovered entries to SSTable",
                recovered.entry_count()
            );
            storage.flush(&recovered)?;
        }

        let next_segment = replayed.segments.last().map_or(1, |id| id + 1);
        let wal = CommitLog::create(
            &config.data_dir,
            config.wal_sync_strategy,
            next_segment,
            replayed.last_lsn + 1,
        )?;
        for segment in replayed.segments {
            wal.remove_segment(segment)?;
        }

        let (compaction_tx, compactor) = if config.compaction_trigger > 0 {
            let (tx, rx) = channel::bounded::<()>(1);
            let storage = Arc::clone(&storage);
            let handle = thread::Builder::new()
                .name("stratakv-compactor".to_string())
                .spawn(move || {
                    while rx.recv().is_ok() {
                        if let Err(e) = storage.compact() {
                            tracing::error!("Background compaction failed: {}", e);
                        }
                    }
                    tracing::debug!("Compaction thread stopped");
                })?;
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        let shared = Arc::new(Shared {
            config,
            wal,
            commit_gate: RwLock::new(()),
            memtables: RwLock::new(Memtables {
                active: Arc::new(MemTable::new()),
                frozen: None,
            }),
            storage,
            halted: RwLock::new(None),
            flush_lock: Mutex::new(()),
            room: Condvar::new(),
            room_lock: Mutex::new(()),
            compaction_tx: Mutex::new(compaction_tx),
        });

        let (flush_tx, flush_rx) = channel::bounded::<()>(1);
        let flusher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("stratakv-flusher".to_string())
                .spawn(move || shared.run_flusher(flush_rx))?
        };

        shared.maybe_schedule_compaction();

        tracing::info!(
            "Engine opened at {} ({} SSTables, next lsn {})",
            shared.config.data_dir.display(),
            shared.storage.sstable_count(),
            shared.wal.next_lsn()
        );

        Ok(Self {
            shared,
            storage_dir,
            flush_tx: Some(flush_tx),
            flusher: Some(flusher),
            compactor,
        })
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable (most recent writes)
    /// 2. Frozen memtable, if a flush is pending
    /// 3. SSTables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;

        let (active, frozen) = self.shared.layers();
        for table in iter::once(&active).chain(frozen.as_ref()) {
            if let Some(entry) = table.get(key) {
                return Ok(entry.into_option());
            }
        }

        self.shared.storage.get(key)
    }

    /// Insert or overwrite a key
    ///
    /// Returns once the WAL append (and its fsync, per the sync strategy)
    /// is done. Never waits for a flush unless the next memtable fills up
    /// before the previous one is on disk.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.apply(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Delete a key
    ///
    /// Writes a tombstone through the same path as `put`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.apply(Operation::Delete { key: key.to_vec() })
    }

    fn apply(&self, operation: Operation) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_writable()?;
        shared.wait_for_room();

        let full = {
            let _gate = shared.commit_gate.read();
            // Re-check: a failure may have halted us while we waited
            shared.ensure_writable()?;

            let appended = shared
                .wal
                .append(operation.clone())
                .map_err(|e| shared.halt(e))?;

            if appended.sync_due {
                if let Err(e) = shared.wal.sync_through(appended.lsn) {
                    let cause = shared.halt(e);
                    if !shared.config.wal_sync_strategy.acks_despite_failed_sync() {
                        return Err(cause);
                    }
                }
            }

            let (key, entry) = match operation {
                Operation::Put { key, value } => (key, MemTableEntry::Value(value)),
                Operation::Delete { key } => (key, MemTableEntry::Tombstone),
            };
            let active = Arc::clone(&shared.memtables.read().active);
            active.apply(appended.lsn, key, entry) >= shared.config.memtable_size_limit
        };

        // Already durable; a failed rotation only halts later writes
        if full {
            match shared.rotate(false) {
                Ok(true) => self.signal_flush(),
                Ok(false) => {}
                Err(e) => {
                    shared.halt(e);
                }
            }
        }

        Ok(())
    }

    /// Lazily iterate live entries with `start <= key < end` in ascending order
    ///
    /// `end = None` scans to the last key. Tombstoned keys are skipped. The
    /// scan sees the memtables as of the call plus the SSTables present at
    /// the call; restart by issuing a new scan from the last key seen.
    ///
    /// The memtable part of the range is copied up front; its size is
    /// reported by [`Scan::snapshot_bytes`].
    pub fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Scan> {
        // Memtables first: a flush racing with us then only duplicates data
        let (active, frozen) = self.shared.layers();

        let mut snapshot_bytes = 0;
        let mut sources: Vec<EntrySource> = Vec::new();
        for table in iter::once(&active).chain(frozen.as_ref()) {
            let recent: Vec<_> = table
                .range(start, end)
                .into_iter()
                .map(|(key, entry)| {
                    snapshot_bytes += key.len() + entry.value_len();
                    Ok((key, entry.into_option()))
                })
                .collect();
            sources.push(Box::new(recent.into_iter()));
        }
        sources.extend(self.shared.storage.range_sources(start, end)?);

        Ok(Scan {
            inner: MergeIterator::new(sources),
            snapshot_bytes,
        })
    }

    /// Write everything in memory out to SSTables, on the calling thread
    ///
    /// Returns once all writes acknowledged before the call are on disk.
    pub fn flush(&self) -> Result<()> {
        let shared = &self.shared;
        shared.ensure_writable()?;

        // A pending frozen table must go first to make room for ours
        shared.flush_frozen().map_err(|e| shared.halt(e))?;
        shared.rotate(true).map_err(|e| shared.halt(e))?;
        shared.flush_frozen().map_err(|e| shared.halt(e))
    }

    /// Merge all SSTables now, on the calling thread
    pub fn compact(&self) -> Result<()> {
        self.shared.storage.compact()?;
        Ok(())
    }

    fn signal_flush(&self) {
        if let Some(tx) = &self.flush_tx {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    tracing::warn!("Flush thread is gone; frozen memtable stays in memory")
                }
            }
        }
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data, syncs the WAL and stops the background
    /// threads.
    pub fn close(mut self) -> Result<()> {
        self.stop_flusher();

        if self.shared.halted_reason().is_none() {
            self.flush()?;
        }
        self.shared.wal.sync()?;

        self.stop_compactor();
        tracing::info!("Engine closed");
        Ok(())
    }

    fn stop_flusher(&mut self) {
        // Dropping the sender ends the flush loop
        self.flush_tx.take();
        if let Some(handle) = self.flusher.take() {
            if handle.join().is_err() {
                tracing::error!("Flush thread panicked");
            }
        }
    }

    fn stop_compactor(&mut self) {
        self.shared.compaction_tx.lock().take();
        if let Some(handle) = self.compactor.take() {
            if handle.join().is_err() {
                tracing::error!("Compaction thread panicked");
            }
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    /// Directory holding the SSTable files
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Approximate footprint of the active and frozen memtables in bytes
    pub fn memtable_size(&self) -> usize {
        let (active, frozen) = self.shared.layers();
        active.size() + frozen.map_or(0, |t| t.size())
    }

    /// Entries held in memory, tombstones included
    pub fn memtable_entry_count(&self) -> usize {
        let (active, frozen) = self.shared.layers();
        active.entry_count() + frozen.map_or(0, |t| t.entry_count())
    }

    /// A frozen memtable is waiting for (or in) its flush
    pub fn flush_pending(&self) -> bool {
        self.shared.memtables.read().frozen.is_some()
    }

    pub fn sstable_count(&self) -> usize {
        self.shared.storage.sstable_count()
    }

    /// Why writes are refused, if they are
    pub fn halted_reason(&self) -> Option<String> {
        self.shared.halted_reason()
    }

    pub fn is_accepting_writes(&self) -> bool {
        self.shared.halted.read().is_none()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Drop for Engine {
    /// Stops the background threads without flushing, like a crash would
    fn drop(&mut self) {
        self.stop_flusher();
        self.stop_compactor();
    }
}

impl Shared {
    /// Current memtables, newest first
    fn layers(&self) -> (Arc<MemTable>, Option<Arc<MemTable>>) {
        let tables = self.memtables.read();
        (
            Arc::clone(&tables.active),
            tables.frozen.as_ref().map(|f| Arc::clone(&f.table)),
        )
    }

    fn run_flusher(&self, wake: Receiver<()>) {
        while wake.recv().is_ok() {
            loop {
                if let Err(e) = self.flush_frozen() {
                    self.halt(e);
                    break;
                }
                // The next table may have filled while we were flushing
                match self.rotate(false) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        self.halt(e);
                        break;
                    }
                }
            }
        }
        tracing::debug!("Flush thread stopped");
    }

    /// Freeze the active memtable and move the WAL to a new segment
    ///
    /// Returns whether a table was frozen. Without `force` only a full
    /// table is frozen. Nothing happens while a frozen table is pending.
    fn rotate(&self, force: bool) -> Result<bool> {
        let _gate = self.commit_gate.write();
        let mut tables = self.memtables.write();

        let active = &tables.active;
        if tables.frozen.is_some() || active.is_empty() {
            return Ok(false);
        }
        if !force && !active.should_flush(self.config.memtable_size_limit) {
            return Ok(false);
        }

        let segment = self.wal.rotate()?;
        let table = std::mem::replace(&mut tables.active, Arc::new(MemTable::new()));
        tracing::debug!(
            "Froze memtable of {} bytes (WAL segment {})",
            table.size(),
            segment
        );
        tables.frozen = Some(Frozen { segment, table });
        Ok(true)
    }

    /// Write the frozen table (if any) to an SSTable and drop its segment
    ///
    /// The segment is only deleted once the table is installed, and a
    /// halted engine flushes nothing, so segments leave in order.
    fn flush_frozen(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        self.ensure_writable()?;

        let Some(frozen) = self.memtables.read().frozen.clone() else {
            return Ok(());
        };

        self.storage.flush(&frozen.table)?;
        self.memtables.write().frozen = None;
        self.wal.remove_segment(frozen.segment)?;

        self.wake_stalled_writers();
        self.maybe_schedule_compaction();
        Ok(())
    }

    /// Block while the active table is full and the previous one is still
    /// flushing
    fn wait_for_room(&self) {
        if !self.stalled() {
            return;
        }
        tracing::debug!("Memtables full, write waits for flush");
        let mut guard = self.room_lock.lock();
        while self.stalled() && self.halted.read().is_none() {
            self.room.wait_for(&mut guard, STALL_POLL);
        }
    }

    fn stalled(&self) -> bool {
        let tables = self.memtables.read();
        tables.frozen.is_some() && tables.active.should_flush(self.config.memtable_size_limit)
    }

    fn wake_stalled_writers(&self) {
        let _guard = self.room_lock.lock();
        self.room.notify_all();
    }

    fn maybe_schedule_compaction(&self) {
        let trigger = self.config.compaction_trigger;
        if trigger == 0 || self.storage.sstable_count() < trigger {
            return;
        }
        if let Some(tx) = self.compaction_tx.lock().as_ref() {
            match tx.try_send(()) {
                Ok(()) => tracing::debug!("Compaction scheduled"),
                // One request already pending covers this one
                Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    tracing::warn!("Compaction thread is gone; compaction skipped")
                }
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.halted.read().as_ref() {
            Some(reason) => Err(StrataError::EngineUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn halted_reason(&self) -> Option<String> {
        self.halted.read().clone()
    }

    /// Latch the engine into read-only mode and convert the cause
    fn halt(&self, cause: StrataError) -> StrataError {
        let reason = {
            let mut halted = self.halted.write();
            halted
                .get_or_insert_with(|| {
                    tracing::error!("Engine halted, refusing further writes: {}", cause);
                    cause.to_string()
                })
                .clone()
        };
        self.wake_stalled_writers();
        StrataError::EngineUnavailable(reason)
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StrataError::InvalidKey);
    }
    Ok(())
}

/// Lazy ascending scan over live entries, produced by [`Engine::scan`]
pub struct Scan {
    inner: MergeIterator,
    snapshot_bytes: usize,
}

impl Scan {
    /// Bytes of key and value data copied out of the memtables
    pub fn snapshot_bytes(&self) -> usize {
        self.snapshot_bytes
    }
}

impl Iterator for Scan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
