//! Segmented commit log
//!
//! The log is split into segments, one per memtable generation. When the
//! engine freezes a memtable it seals the current segment and starts the
//! next; once the frozen table is in an SSTable its segment is deleted.
//!
//! Appends are serialized but cheap (a buffered write handed to the OS).
//! Syncing is group commit: a writer that needs durability takes the sync
//! lock, and one `fsync` covers every record appended before it started.
//! Writers that queued behind it usually find their record already synced.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::WalSyncStrategy;
use crate::error::{Result, StrataError};
use crate::storage::sync_dir;

use super::{Operation, WalEntry, WalRecovery, WalWriter};

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_EXTENSION: &str = "log";

/// File name of segment `id`: `wal_000001.log`
pub fn segment_file_name(id: u64) -> String {
    format!("{}{:06}.{}", SEGMENT_PREFIX, id, SEGMENT_EXTENSION)
}

/// Segment id encoded in a file name, if it is one
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXTENSION)?
        .strip_suffix('.')?;
    digits.parse().ok()
}

/// Everything found in a directory's segments at startup
#[derive(Debug, Default)]
pub struct Replayed {
    /// Valid entries of every segment, oldest segment first
    pub entries: Vec<WalEntry>,
    /// Ids of the segments read, ascending
    pub segments: Vec<u64>,
    /// Highest LSN seen (0 for an empty log)
    pub last_lsn: u64,
}

/// Result of one append
#[derive(Debug, Clone, Copy)]
pub struct Appended {
    pub lsn: u64,
    /// The sync strategy wants this record on disk before it is acknowledged
    pub sync_due: bool,
}

struct Tail {
    segment: u64,
    writer: WalWriter,
    /// Separate handle so `fsync` runs without the append lock
    handle: Arc<File>,
    /// Records appended since the last periodic sync
    unsynced: usize,
}

/// The engine's write-ahead log
pub struct CommitLog {
    dir: PathBuf,
    strategy: WalSyncStrategy,
    tail: Mutex<Tail>,
    /// Highest LSN handed to the OS
    appended: AtomicU64,
    /// Highest LSN known to be on disk; holding this lock is what groups commits
    synced: Mutex<u64>,
}

impl CommitLog {
    /// Recover every segment in `dir`, oldest first
    ///
    /// Torn tails are cut back to their last valid record. The segments are
    /// left in place; the caller removes them once their contents are safe.
    pub fn replay(dir: &Path) -> Result<Replayed> {
        let mut segments: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(id) = parse_segment_id(&path) {
                segments.push((id, path));
            }
        }
        segments.sort_by_key(|(id, _)| *id);

        let mut replayed = Replayed::default();
        for (id, path) in segments {
            let (entries, recovery) = WalRecovery::recover(&path)?;
            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    "WAL segment {}: {} entries recovered, {} corrupted, truncated={}",
                    id,
                    recovery.entries_recovered,
                    recovery.entries_corrupted,
                    recovery.was_truncated
                );
            }
            replayed.last_lsn = replayed.last_lsn.max(recovery.last_lsn);
            replayed.entries.extend(entries);
            replayed.segments.push(id);
        }
        Ok(replayed)
    }

    /// Start a fresh segment `segment` whose first record gets `next_lsn`
    pub fn create(
        dir: &Path,
        strategy: WalSyncStrategy,
        segment: u64,
        next_lsn: u64,
    ) -> Result<Self> {
        let tail = Self::open_tail(dir, segment, next_lsn)?;
        sync_dir(dir);
        let last = tail.writer.current_lsn() - 1;

        Ok(Self {
            dir: dir.to_path_buf(),
            strategy,
            tail: Mutex::new(tail),
            appended: AtomicU64::new(last),
            synced: Mutex::new(last),
        })
    }

    fn open_tail(dir: &Path, segment: u64, next_lsn: u64) -> Result<Tail> {
        let writer = WalWriter::open_at(&dir.join(segment_file_name(segment)), next_lsn)?;
        let handle = Arc::new(writer.sync_handle()?);
        Ok(Tail {
            segment,
            writer,
            handle,
            unsynced: 0,
        })
    }

    /// Append a record to the current segment
    pub fn append(&self, operation: Operation) -> Result<Appended> {
        let mut tail = self.tail.lock();
        let lsn = tail.writer.append(operation)?;
        self.appended.store(lsn, Ordering::Release);

        let sync_due = match self.strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => {
                tail.unsynced += 1;
                let due = tail.unsynced >= count;
                if due {
                    tail.unsynced = 0;
                }
                due
            }
        };
        Ok(Appended { lsn, sync_due })
    }

    /// Make sure every record up to `lsn` is on disk
    ///
    /// Records appended while an earlier caller was syncing are covered by
    /// the next `fsync`, which one of them performs for all.
    pub fn sync_through(&self, lsn: u64) -> Result<()> {
        let mut synced = self.synced.lock();
        if *synced >= lsn {
            return Ok(());
        }

        let (target, handle) = {
            let tail = self.tail.lock();
            (self.appended.load(Ordering::Acquire), Arc::clone(&tail.handle))
        };
        handle
            .sync_data()
            .map_err(|e| StrataError::WalWrite(format!("fsync through lsn {} failed: {}", target, e)))?;
        *synced = target;
        Ok(())
    }

    /// Sync everything appended so far
    pub fn sync(&self) -> Result<()> {
        self.sync_through(self.appended.load(Ordering::Acquire))
    }

    /// Seal the current segment and start the next, returning the sealed id
    ///
    /// The caller must keep appenders out while this runs.
    pub fn rotate(&self) -> Result<u64> {
        let mut synced = self.synced.lock();
        let mut tail = self.tail.lock();

        tail.writer.sync()?;
        *synced = self.appended.load(Ordering::Acquire);

        let sealed = tail.segment;
        let next = Self::open_tail(&self.dir, sealed + 1, tail.writer.current_lsn())?;
        *tail = next;
        sync_dir(&self.dir);

        tracing::debug!("WAL segment {} sealed, writing to {}", sealed, sealed + 1);
        Ok(sealed)
    }

    /// Delete a sealed segment whose records are safe in an SSTable
    pub fn remove_segment(&self, segment: u64) -> Result<()> {
        let path = self.segment_path(segment);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Id of the segment taking appends
    pub fn segment(&self) -> u64 {
        self.tail.lock().segment
    }

    pub fn segment_path(&self, segment: u64) -> PathBuf {
        self.dir.join(segment_file_name(segment))
    }

    /// LSN the next append will receive
    pub fn next_lsn(&self) -> u64 {
        self.tail.lock().writer.current_lsn()
    }
}
