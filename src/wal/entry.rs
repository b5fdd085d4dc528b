//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CellarError, Result};

/// Header size: LSN (8) + CRC (4) + Len (4) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL: everything one write transaction committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Timestamp (unix millis) when the transaction committed
    pub timestamp: u64,

    /// Operations in the order the transaction applied them
    pub operations: Vec<Operation>,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Register a new named store
    CreateStore { name: Vec<u8>, duplicates: bool },

    /// Drop a store and all of its records
    DropStore { name: Vec<u8> },

    /// Put a record
    Put {
        store: Vec<u8>,
        key: Vec<u8>,
        value: Vec<u8>,
    },

    /// Delete one duplicate (`value: Some`) or a whole key (`value: None`)
    Delete {
        store: Vec<u8>,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    },
}

/// Serialized body of an entry (everything after the header)
#[derive(Deserialize)]
struct EntryBody {
    timestamp: u64,
    operations: Vec<Operation>,
}

/// Borrowing twin of `EntryBody`; encodes to identical bytes
#[derive(Serialize)]
struct EntryBodyRef<'a> {
    timestamp: u64,
    operations: &'a [Operation],
}

impl WalEntry {
    /// Create an entry stamped with the current time
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            timestamp,
            operations,
        }
    }

    /// Encode to `[LSN][CRC][Len][Data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = EntryBodyRef {
            timestamp: self.timestamp,
            operations: &self.operations,
        };
        let data = bincode::serialize(&body)?;
        let len = u32::try_from(data.len()).map_err(|_| {
            CellarError::WalWrite(format!("entry of {} bytes exceeds frame limit", data.len()))
        })?;

        let crc = Self::compute_crc(self.lsn, len, &data);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Decode a complete entry, validating its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = Self::parse_header(bytes)?;
        let data = bytes.get(HEADER_SIZE..HEADER_SIZE + len as usize).ok_or_else(|| {
            CellarError::WalCorruption(format!(
                "entry {} truncated: expected {} data bytes, got {}",
                lsn,
                len,
                bytes.len().saturating_sub(HEADER_SIZE)
            ))
        })?;
        Self::from_parts(lsn, crc, len, data)
    }

    /// Split a header into (lsn, crc, len)
    pub(crate) fn parse_header(bytes: &[u8]) -> Result<(u64, u32, u32)> {
        if bytes.len() < HEADER_SIZE {
            return Err(CellarError::WalCorruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);
        Ok((
            u64::from_le_bytes(lsn),
            u32::from_le_bytes(crc),
            u32::from_le_bytes(len),
        ))
    }

    /// Rebuild an entry from a parsed header and its data section
    pub(crate) fn from_parts(lsn: u64, crc: u32, len: u32, data: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(lsn, len, data);
        if actual != crc {
            return Err(CellarError::WalCorruption(format!(
                "CRC mismatch on entry {}: expected {:08x}, got {:08x}",
                lsn, crc, actual
            )));
        }

        let body: EntryBody = bincode::deserialize(data).map_err(|e| {
            CellarError::WalCorruption(format!("undecodable entry {}: {}", lsn, e))
        })?;

        Ok(Self {
            lsn,
            timestamp: body.timestamp,
            operations: body.operations,
        })
    }

    fn compute_crc(lsn: u64, len: u32, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}
