//! Container Reader
//!
//! Loads a container file and rebuilds the snapshot it describes.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{CellarError, Result};
use crate::tree::{Snapshot, Tree};

use super::{FLAG_DUPLICATES, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Reader over a fully loaded, checksum-verified container file
pub struct ContainerReader {
    /// Path to the container file
    path: PathBuf,
    /// File contents
    data: Bytes,
    /// Stores declared in the header
    store_count: u32,
    /// LSN of the last commit folded into the file
    last_lsn: u64,
}

impl ContainerReader {
    /// Open a container file, validating magic, version and data CRC
    pub fn open(path: &Path) -> Result<Self> {
        let data = Bytes::from(fs::read(path)?);

        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(format!(
                "file too small: {} bytes",
                data.len()
            )));
        }

        if &data[0..4] != MAGIC {
            return Err(corrupt("invalid header magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                version, VERSION
            )));
        }
        let store_count = u32::from_le_bytes(array(&data[6..10]));
        let last_lsn = u64::from_le_bytes(array(&data[10..18]));

        let footer_start = data.len() - FOOTER_SIZE;
        if &data[footer_start + 4..] != MAGIC {
            return Err(corrupt("invalid footer magic"));
        }
        let stored_crc = u32::from_le_bytes(array(&data[footer_start..footer_start + 4]));
        let computed_crc = crc32fast::hash(&data[HEADER_SIZE..footer_start]);
        if stored_crc != computed_crc {
            return Err(corrupt(format!(
                "data CRC mismatch: expected {:08x}, got {:08x}",
                stored_crc, computed_crc
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
            store_count,
            last_lsn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_count(&self) -> u32 {
        self.store_count
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    /// Decode every store block into a snapshot
    ///
    /// Fails if any block is truncated, out of order, or disagrees with
    /// its declared record count.
    pub fn into_snapshot(self) -> Result<Snapshot> {
        let end = self.data.len() - FOOTER_SIZE;
        let mut cursor = Decoder::new(self.data.slice(HEADER_SIZE..end));
        let mut snapshot = Snapshot::new();
        snapshot.set_lsn(self.last_lsn);

        let mut last_name: Option<Bytes> = None;
        for _ in 0..self.store_count {
            let name_len = cursor.u32()? as usize;
            let flags = cursor.u8()?;
            let record_count = cursor.u64()?;
            let name = Bytes::copy_from_slice(&cursor.take(name_len)?);

            if last_name.as_ref().map_or(false, |last| *last >= name) {
                return Err(corrupt(format!(
                    "store {:?} out of order",
                    String::from_utf8_lossy(&name)
                )));
            }

            let mut tree = Tree::new(flags & FLAG_DUPLICATES != 0);
            for _ in 0..record_count {
                let key_len = cursor.u32()? as usize;
                let value_len = cursor.u32()? as usize;
                // Copy out so live records do not pin the whole file buffer
                let key = Bytes::copy_from_slice(&cursor.take(key_len)?);
                let value = Bytes::copy_from_slice(&cursor.take(value_len)?);
                tree.put(key, value);
            }

            if tree.len() as u64 != record_count {
                return Err(corrupt(format!(
                    "store {:?} declares {} records, decoded {}",
                    String::from_utf8_lossy(&name),
                    record_count,
                    tree.len()
                )));
            }

            tracing::debug!(
                "Loaded store {:?} ({} records)",
                String::from_utf8_lossy(&name),
                record_count
            );
            snapshot.insert_tree(name.clone(), tree);
            last_name = Some(name);
        }

        if !cursor.is_empty() {
            return Err(corrupt(format!(
                "{} trailing bytes after last store",
                cursor.remaining()
            )));
        }

        Ok(snapshot)
    }
}

/// Sequential decoder over the data section
struct Decoder {
    data: Bytes,
    pos: usize,
}

impl Decoder {
    fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(corrupt(format!(
                "truncated block at offset {}: need {} bytes, have {}",
                HEADER_SIZE + self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(array(&self.take(4)?)))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(array(&self.take(8)?)))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn corrupt(reason: impl Into<String>) -> CellarError {
    CellarError::ContainerCorruption(reason.into())
}
