//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, StrataError};

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries found (recovery stops at the first one)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was (or, for `verify`, would be) truncated
    pub was_truncated: bool,

    /// Byte length of the valid prefix
    pub valid_len: u64,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// Reads entries in order until end of log, a torn tail or the first
    /// corrupted entry. Appends are sequential, so nothing after a bad entry
    /// can be trusted: the file is truncated back to the valid prefix and
    /// the valid entries are returned in LSN order.
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result) = Self::scan(path, true)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                "WAL {} truncated to {} bytes ({} corrupted entries)",
                path.display(),
                result.valid_len,
                result.entries_corrupted
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result) = Self::scan(path, false)?;
        Ok(result)
    }

    fn scan(path: &Path, collect: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    if collect {
                        entries.push(entry);
                    }
                }
                Ok(None) => break,
                Err(StrataError::WalCorruption(reason)) => {
                    tracing::warn!("WAL corruption after lsn {}: {}", result.last_lsn, reason);
                    result.entries_corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        result.valid_len = reader.position();
        result.was_truncated = result.valid_len < file_len;
        Ok((entries, result))
    }
}
