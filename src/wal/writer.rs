//! WAL Writer
//!
//! Appends entries to one WAL file.
//!
//! Two layers of buffering:
//!   BufWriter.flush()  → Rust buffer → OS page cache   (every append)
//!   file.sync_data()   → OS page cache → physical disk (`sync`)
//!
//! When to sync is the caller's decision; see [`super::CommitLog`].

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};

use super::recovery::WalRecovery;
use super::{Operation, WalEntry};

/// Writes entries to a WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN the next append will receive
    next_lsn: u64,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// Existing entries are scanned so LSNs keep increasing across restarts.
    pub fn open(path: &Path) -> Result<Self> {
        let next_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn + 1
        } else {
            1
        };
        Self::open_at(path, next_lsn)
    }

    /// Open a WAL file whose next LSN is already known
    pub fn open_at(path: &Path, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: next_lsn.max(1),
        })
    }

    /// Append an operation, returning its LSN
    ///
    /// The record reaches the OS before this returns; it is durable only
    /// after a later `sync` (or a sync through the handle from `sync_handle`).
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let lsn = self.next_lsn;
        let entry = WalEntry::new(lsn, operation);
        let bytes = entry.serialize()?;

        self.writer
            .write_all(&bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| StrataError::WalWrite(format!("append of lsn {} failed: {}", lsn, e)))?;

        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Force everything appended so far to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_data())
            .map_err(|e| StrataError::WalWrite(format!("fsync failed: {}", e)))
    }

    /// A second handle on the same file, for syncing without holding the writer
    pub fn sync_handle(&self) -> Result<File> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    /// Get the LSN the next append will use
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
