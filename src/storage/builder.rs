//! Container Builder
//!
//! Writes a snapshot's stores to a new container file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CellarError, Result};
use crate::tree::{Snapshot, Tree};

use super::{ContainerMeta, FLAG_DUPLICATES, MAGIC, STORE_COUNT_OFFSET, VERSION};

/// Builder for container files; stores must be added in name order
pub struct ContainerBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Stores written so far
    store_count: u32,
    /// Records written so far
    record_count: u64,
    /// Last store name, to enforce ordering
    last_name: Option<Vec<u8>>,
    /// LSN recorded in the header
    last_lsn: u64,
    /// Running CRC hasher for the data section
    data_hasher: crc32fast::Hasher,
}

impl ContainerBuilder {
    /// Create a new container builder
    ///
    /// Writes the header immediately; call `add_store()` in name order,
    /// then `finish()` to write the footer.
    pub fn new(path: &Path, last_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        // Header (store count placeholder, patched in finish)
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&last_lsn.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            store_count: 0,
            record_count: 0,
            last_name: None,
            last_lsn,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Write a complete snapshot to `path`
    pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<ContainerMeta> {
        let mut builder = Self::new(path, snapshot.lsn())?;
        for (name, tree) in snapshot.stores() {
            builder.add_store(name, tree)?;
        }
        builder.finish()
    }

    /// Append one store block with all of its records
    pub fn add_store(&mut self, name: &[u8], tree: &Tree) -> Result<()> {
        if let Some(last) = &self.last_name {
            if last.as_slice() >= name {
                return Err(CellarError::Storage(format!(
                    "stores must be added in name order ({:?} after {:?})",
                    String::from_utf8_lossy(name),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        let flags = if tree.duplicates() { FLAG_DUPLICATES } else { 0 };
        self.write_u32(len_u32(name.len())?)?;
        self.write_bytes(&[flags])?;
        self.write_bytes(&(tree.len() as u64).to_le_bytes())?;
        self.write_bytes(name)?;

        for (key, value) in tree.iter() {
            self.write_u32(len_u32(key.len())?)?;
            self.write_u32(len_u32(value.len())?)?;
            self.write_bytes(key)?;
            self.write_bytes(value)?;
            self.record_count += 1;
        }

        self.store_count += 1;
        self.last_name = Some(name.to_vec());
        Ok(())
    }

    /// Finish building: write the footer, patch the header, fsync
    pub fn finish(mut self) -> Result<ContainerMeta> {
        let data_crc = self.data_hasher.clone().finalize();

        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            CellarError::Storage(format!("Failed to flush container: {}", e))
        })?;
        file.seek(SeekFrom::Start(STORE_COUNT_OFFSET))?;
        file.write_all(&self.store_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(ContainerMeta {
            path: self.path,
            store_count: self.store_count,
            record_count: self.record_count,
            last_lsn: self.last_lsn,
            file_size,
        })
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.data_hasher.update(bytes);
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| CellarError::Storage(format!("field of {} bytes is too large", len)))
}
