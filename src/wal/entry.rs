//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their on-disk
//! encoding.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Size of the fixed entry header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single payload; anything larger is treated as corruption
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Bincode payload stored after the header
#[derive(Serialize, Deserialize)]
struct Payload {
    operation: Operation,
    timestamp: u64,
}

impl WalEntry {
    /// Create an entry stamped with the current wall-clock time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let payload = Payload {
            operation: self.operation.clone(),
            timestamp: self.timestamp,
        };
        Ok(bincode::serialize(&payload)?)
    }

    fn crc_of(lsn: u64, len: u32, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Checksum over LSN, length and payload
    pub fn compute_crc(&self) -> Result<u32> {
        let payload = self.payload()?;
        Ok(Self::crc_of(self.lsn, payload.len() as u32, &payload))
    }

    /// Number of bytes `serialize` will produce
    pub fn serialized_size(&self) -> Result<usize> {
        let payload_len = bincode::serialized_size(&Payload {
            operation: self.operation.clone(),
            timestamp: self.timestamp,
        })? as usize;
        Ok(HEADER_SIZE + payload_len)
    }

    /// Encode as `[lsn][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(StrataError::WalWrite(format!(
                "entry payload of {} bytes exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let len = payload.len() as u32;
        let crc = Self::crc_of(self.lsn, len, &payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Parse the fixed header: (lsn, crc, payload_len)
    pub fn decode_header(header: &[u8]) -> Result<(u64, u32, usize)> {
        if header.len() < HEADER_SIZE {
            return Err(StrataError::WalCorruption(format!(
                "header too small: {} bytes",
                header.len()
            )));
        }
        let lsn = u64::from_le_bytes(header[0..8].try_into().expect("8-byte slice"));
        let crc = u32::from_le_bytes(header[8..12].try_into().expect("4-byte slice"));
        let len = u32::from_le_bytes(header[12..16].try_into().expect("4-byte slice")) as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(StrataError::WalCorruption(format!(
                "payload length {} exceeds maximum",
                len
            )));
        }
        Ok((lsn, crc, len))
    }

    /// Decode an entry from header + payload bytes, verifying the checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = Self::decode_header(bytes)?;
        let end = HEADER_SIZE + len;
        if bytes.len() < end {
            return Err(StrataError::WalCorruption(format!(
                "truncated entry: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }
        let payload = &bytes[HEADER_SIZE..end];

        let actual = Self::crc_of(lsn, len as u32, payload);
        if actual != crc {
            return Err(StrataError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:08x}, computed {:08x}",
                lsn, crc, actual
            )));
        }

        let payload: Payload = bincode::deserialize(payload)
            .map_err(|e| StrataError::WalCorruption(format!("undecodable payload: {}", e)))?;

        Ok(Self {
            lsn,
            operation: payload.operation,
            timestamp: payload.timestamp,
        })
    }
}
