//! # StrataKV
//!
//! A single-node key-value server: an HTTP entity API over an embedded
//! LSM engine, sized to run under a fixed memory ceiling.
//!
//! ## Request path
//!
//! ```text
//!  client ──HTTP/1.1──▶ Server (tokio, hyper)
//!                          │ over worker_threads + queue_depth ──▶ 503
//!                          ▼
//!                     api::Router ──▶ Governor: worker slot, byte budget
//!                                      │ spawn_blocking
//!                                      ▼
//!                                   Engine
//!                     ┌────────────────┼─────────────────┐
//!                     ▼                ▼                 ▼
//!                   WAL ──commit──▶ MemTable ──freeze──▶ flush thread ──▶ SSTables
//!                                                                          │
//!                                                                compaction thread
//! ```
//!
//! Writers share the WAL and group-commit their fsyncs; a full memtable is
//! frozen and flushed in the background. Reads never wait for writers.
//! A scan is a lazy k-way merge over the memtables and every table.

pub mod config;
pub mod error;

pub mod engine;
pub mod memtable;
pub mod storage;
pub mod wal;

pub mod api;
pub mod client;
pub mod governor;
pub mod network;

pub use client::{Client, ClientResponse};
pub use config::{Config, WalSyncStrategy};
pub use engine::{Engine, Scan};
pub use error::{Result, StrataError};
pub use network::Server;

/// Crate version, reported by the server at startup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
