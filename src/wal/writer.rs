//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::{Operation, WalEntry, WalReader};

/// Writes entries to the WAL file
pub struct WalWriter {
    /// Path of the log file
    path: PathBuf,

    /// Append handle; each frame is built in memory and written whole
    file: File,

    /// LSN the next append will receive
    next_lsn: u64,

    /// Bytes of complete entries in the file
    size: u64,

    /// When to fsync
    sync_strategy: WalSyncStrategy,

    /// Appends since the last fsync
    unsynced: usize,

    /// Make the next fsync fail
    #[cfg(test)]
    fail_sync: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// Existing entries are scanned so that new appends continue the LSN
    /// sequence; anything after the last valid entry is overwritten.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let (last_lsn, valid_len) = if path.exists() {
            let mut reader = WalReader::open(path)?;
            let mut last_lsn = 0;
            while let Ok(Some(entry)) = reader.next_entry() {
                last_lsn = entry.lsn;
            }
            (last_lsn, reader.valid_offset())
        } else {
            (0, 0)
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)?;
        file.set_len(valid_len)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_lsn: last_lsn + 1,
            size: valid_len,
            sync_strategy,
            unsynced: 0,
            #[cfg(test)]
            fail_sync: false,
        })
    }

    /// Append one committed transaction; returns its LSN
    ///
    /// The LSN is consumed only once the frame is written and, when the
    /// strategy calls for it, synced. On failure the frame is cut off again.
    pub fn append(&mut self, operations: Vec<Operation>) -> Result<u64> {
        let entry = WalEntry::new(self.next_lsn, operations);
        let bytes = entry.serialize()?;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };
        let written = self
            .write_frame(&bytes)
            .and_then(|_| if due { self.sync_data() } else { Ok(()) });
        if let Err(e) = written {
            // Cut off the frame so later appends stay readable
            tracing::error!("WAL append of lsn {} failed: {}", entry.lsn, e);
            self.rollback_tail();
            return Err(e);
        }

        self.size += bytes.len() as u64;
        self.next_lsn += 1;
        self.unsynced = if due { 0 } else { self.unsynced + 1 };

        Ok(entry.lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Discard every entry; the next append receives `next_lsn`
    pub fn truncate(&mut self, next_lsn: u64) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;

        self.size = 0;
        self.next_lsn = next_lsn;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Size of the log in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn sync_data(&mut self) -> Result<()> {
        #[cfg(test)]
        let injected = self.fail_sync;
        #[cfg(not(test))]
        let injected = false;
        if injected {
            return Err(std::io::Error::other("injected fsync failure").into());
        }
        self.file.sync_data()?;
        Ok(())
    }

    fn rollback_tail(&mut self) {
        let size = self.size;
        let file = &mut self.file;
        let restored = file
            .set_len(size)
            .and_then(|_| file.seek(SeekFrom::Start(size)).map(|_| ()));
        if let Err(e) = restored {
            tracing::warn!("Could not trim WAL tail at {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalRecovery;
    use tempfile::TempDir;

    fn put(key: &str) -> Vec<Operation> {
        vec![Operation::Put {
            store: b"s".to_vec(),
            key: key.as_bytes().to_vec(),
            value: b"v".to_vec(),
        }]
    }

    #[test]
    fn test_failed_sync_does_not_consume_lsn() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();

        assert_eq!(writer.append(put("a")).unwrap(), 1);
        let size = writer.size();

        writer.fail_sync = true;
        assert!(writer.append(put("b")).is_err());
        assert_eq!(writer.current_lsn(), 2);
        assert_eq!(writer.size(), size);
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), size);

        writer.fail_sync = false;
        assert_eq!(writer.append(put("c")).unwrap(), 2);
        drop(writer);

        let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
        let lsns: Vec<u64> = entries.iter().map(|e| e.lsn).collect();
        assert_eq!(lsns, vec![1, 2]);
        assert_eq!(result.entries_corrupted, 0);
    }

    #[test]
    fn test_batched_sync_failure_rolls_back_last_frame() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let strategy = WalSyncStrategy::EveryNEntries { count: 2 };
        let mut writer = WalWriter::open(&wal_path, strategy).unwrap();

        // The first append is not due for a sync
        writer.fail_sync = true;
        assert_eq!(writer.append(put("a")).unwrap(), 1);
        let size = writer.size();

        assert!(writer.append(put("b")).is_err());
        assert_eq!(writer.current_lsn(), 2);
        assert_eq!(writer.size(), size);
    }
}
