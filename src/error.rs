//! Error types for StrataKV
//!
//! One error enum shared by the engine, the HTTP layer and the client. The
//! API maps `InvalidKey` and `Protocol` to 400, `Overloaded` to 503 and
//! everything else to 500.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A WAL record failed its checksum or could not be decoded
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    /// SSTable format, ordering or checksum problem
    #[error("Storage error: {0}")]
    Storage(String),

    /// Key absent from a single SSTable; never surfaces past the storage layer
    #[error("Key not found")]
    KeyNotFound,

    #[error("Invalid key: keys must be non-empty")]
    InvalidKey,

    /// Writes are halted after a write-path failure, or the data directory
    /// could not be opened safely
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client-side connection trouble or an unexpected status
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or unroutable request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Byte budget or worker capacity exhausted; the client may retry
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// A worker task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}
