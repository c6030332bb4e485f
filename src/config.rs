//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults. A `Config` is built once
//! at process start and never mutated afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StrataError};

const MB: usize = 1024 * 1024;

/// Main configuration for a StrataKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, SSTables, etc.)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal_000001.log   (write-ahead log segments)
    ///     └── sstables/        (SSTable files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable / Compaction Configuration
    // -------------------------------------------------------------------------
    /// Size at which the active memtable is frozen and flushed (in bytes)
    ///
    /// One frozen table may be flushing while the next fills, so memtables
    /// account for up to twice this much.
    pub memtable_size_limit: usize,

    /// Number of SSTables that triggers a background compaction (0 = never)
    pub compaction_trigger: usize,

    // -------------------------------------------------------------------------
    // Memory Budget
    // -------------------------------------------------------------------------
    /// Overall memory ceiling the process is expected to stay under
    pub memory_limit: usize,

    /// Total bytes of request/response payload that may be buffered at once
    pub max_buffered_bytes: usize,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// HTTP listen address
    pub listen_addr: String,

    /// Requests allowed to run engine calls at once
    pub worker_threads: usize,

    /// Admitted requests allowed to wait for a free worker; beyond
    /// `worker_threads + queue_depth` requests are shed with 503
    pub queue_depth: usize,

    /// Deadline for a complete request head, including the wait for the
    /// next request on a kept-alive connection (milliseconds)
    pub idle_timeout_ms: u64,

    /// Deadline for receiving a request body once its head is in (milliseconds)
    pub request_timeout_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl WalSyncStrategy {
    /// Whether a write may still be acknowledged when the fsync it set off fails
    ///
    /// `EveryWrite` promised this write would be on disk, so the failure is
    /// the write's. `EveryNEntries` only syncs periodically: the record is
    /// already appended and was never promised a sync of its own, so the
    /// write is acknowledged and the engine halts.
    pub fn acks_despite_failed_sync(&self) -> bool {
        matches!(self, WalSyncStrategy::EveryNEntries { .. })
    }
}

impl FromStr for WalSyncStrategy {
    type Err = StrataError;

    /// Accepts `every-write` or `every-n:<count>`
    fn from_str(s: &str) -> Result<Self> {
        if s == "every-write" {
            return Ok(WalSyncStrategy::EveryWrite);
        }
        if let Some(count) = s.strip_prefix("every-n:") {
            let count: usize = count
                .parse()
                .map_err(|_| StrataError::Config(format!("invalid sync count: {}", count)))?;
            if count == 0 {
                return Err(StrataError::Config("sync count must be positive".to_string()));
            }
            return Ok(WalSyncStrategy::EveryNEntries { count });
        }
        Err(StrataError::Config(format!(
            "unknown sync strategy '{}', expected every-write or every-n:<count>",
            s
        )))
    }
}

impl fmt::Display for WalSyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalSyncStrategy::EveryWrite => write!(f, "every-write"),
            WalSyncStrategy::EveryNEntries { count } => write!(f, "every-n:{}", count),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 16 * MB,
            compaction_trigger: 4,
            memory_limit: 128 * MB,
            max_buffered_bytes: 32 * MB,
            max_body_bytes: 4 * MB,
            listen_addr: "127.0.0.1:8080".to_string(),
            worker_threads: 8,
            queue_depth: 64,
            idle_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the settings fit together and inside the memory ceiling
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(StrataError::Config("worker_threads must be positive".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(StrataError::Config("queue_depth must be positive".to_string()));
        }
        if self.memtable_size_limit == 0 {
            return Err(StrataError::Config("memtable_size_limit must be positive".to_string()));
        }
        if self.max_body_bytes > self.max_buffered_bytes {
            return Err(StrataError::Config(format!(
                "max_body_bytes ({}) exceeds max_buffered_bytes ({})",
                self.max_body_bytes, self.max_buffered_bytes
            )));
        }
        let committed = 2 * self.memtable_size_limit + self.max_buffered_bytes;
        if committed > self.memory_limit {
            return Err(StrataError::Config(format!(
                "two memtables ({} each) + buffered bytes ({}) exceed memory limit ({})",
                self.memtable_size_limit, self.max_buffered_bytes, self.memory_limit
            )));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the SSTable count that triggers compaction (0 disables it)
    pub fn compaction_trigger(mut self, tables: usize) -> Self {
        self.config.compaction_trigger = tables;
        self
    }

    /// Set the process memory ceiling (in bytes)
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Set the buffered payload budget (in bytes)
    pub fn max_buffered_bytes(mut self, bytes: usize) -> Self {
        self.config.max_buffered_bytes = bytes;
        self
    }

    /// Set the largest accepted request body (in bytes)
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    /// Set the HTTP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the number of worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Set the admission queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Set the idle timeout (in milliseconds)
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout_ms = ms;
        self
    }

    /// Set the request body deadline (in milliseconds)
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
