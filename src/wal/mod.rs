//! Write-ahead log
//!
//! Every mutation is appended here before it reaches the memtable; the
//! append (plus the configured fsync) is the commit point of a write. The
//! log is a run of segment files, one per memtable generation
//! ([`CommitLog`]). On startup every segment is replayed into a fresh
//! memtable, flushed to an SSTable and then deleted.
//!
//! ## Record layout
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┐
//! │ LSN u64  │ CRC u32  │ len u32  │ bincode(Operation,   │
//! │          │ (payload)│          │         timestamp)   │
//! └──────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! A record that is cut short or fails its checksum ends replay: everything
//! before it is kept, the torn tail is discarded.

mod entry;
mod log;
mod reader;
mod recovery;
mod writer;

pub use entry::{Operation, WalEntry, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use log::{parse_segment_id, segment_file_name, Appended, CommitLog, Replayed};
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
