//! Storage Manager
//!
//! Owns the backing container: the checkpoint file and the WAL.
//!
//! ## Responsibilities
//! - Open or create the container on startup and rebuild the committed snapshot
//! - Append committed write transactions to the WAL
//! - Fold the WAL into a fresh checkpoint file (atomic rename) and truncate it
//! - Hold an exclusive lock on the data directory while open

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::Config;
use crate::error::{CellarError, Result};
use crate::tree::Snapshot;
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::{ContainerBuilder, ContainerMeta, ContainerReader};

/// Manages the on-disk container
///
/// ## Concurrency:
/// Not internally synchronized. The environment keeps it behind a mutex and
/// only the writer-slot holder (or `stop`) calls the mutating methods.
pub struct StorageManager {
    /// Root directory of the container
    data_dir: PathBuf,

    /// Write-ahead log of commits since the last checkpoint
    wal: WalWriter,

    /// WAL size that makes `should_checkpoint()` true
    checkpoint_threshold: u64,

    /// LSN folded into the checkpoint file
    checkpoint_lsn: u64,

    /// Lock file held exclusively until `release_lock` or drop
    lock: File,
}

impl StorageManager {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    pub const CONTAINER_FILENAME: &'static str = "data.ckv";
    pub const WAL_FILENAME: &'static str = "wal.log";
    pub const LOCK_FILENAME: &'static str = "cellarkv.lock";
    const TMP_SUFFIX: &'static str = "tmp";

    /// Open or create the container under `config.data_dir`
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist and lock it
    /// 2. Load the checkpoint file (every persisted store)
    /// 3. Replay WAL entries newer than the checkpoint
    /// 4. Check the catalog and capacity limits
    /// 5. Write a fresh checkpoint and empty the WAL
    ///
    /// Any failure is reported as `StorageOpen`.
    pub fn open(config: &Config) -> Result<(Self, Snapshot)> {
        Self::open_inner(config).map_err(|e| {
            tracing::error!("Failed to open storage at {}: {}", config.data_dir.display(), e);
            match e {
                e @ CellarError::StorageOpen { .. } => e,
                other => CellarError::storage_open(&config.data_dir, other),
            }
        })
    }

    fn open_inner(config: &Config) -> Result<(Self, Snapshot)> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;
        let lock = Self::lock_dir(&config.data_dir)?;

        let container_path = config.data_dir.join(Self::CONTAINER_FILENAME);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        // Step 2: Load checkpointed stores
        let existed = container_path.exists();
        let mut snapshot = if existed {
            ContainerReader::open(&container_path)?.into_snapshot()?
        } else {
            Snapshot::new()
        };
        let checkpoint_lsn = snapshot.lsn();

        // Step 3: Replay the WAL tail
        let mut replayed = 0u64;
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    "WAL recovery: {} entries recovered, {} corrupted, last_lsn={}",
                    recovery.entries_recovered,
                    recovery.entries_corrupted,
                    recovery.last_lsn
                );
            }

            for entry in entries {
                if entry.lsn <= checkpoint_lsn {
                    continue;
                }
                for op in &entry.operations {
                    snapshot.apply(op)?;
                }
                snapshot.set_lsn(entry.lsn);
                replayed += 1;
            }
        }

        // Step 4: Limits
        if snapshot.store_count() > config.max_stores {
            return Err(CellarError::StoresFull {
                max_stores: config.max_stores,
            });
        }
        if snapshot.payload() > config.map_size {
            return Err(CellarError::MapFull {
                required: snapshot.payload(),
                map_size: config.map_size,
            });
        }

        // Step 5: Make recovered state durable in the checkpoint file
        let wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        let mut manager = Self {
            data_dir: config.data_dir.clone(),
            wal,
            checkpoint_threshold: config.checkpoint_threshold,
            checkpoint_lsn,
            lock,
        };

        if replayed > 0 || !existed {
            if replayed > 0 {
                tracing::info!("Checkpointing {} replayed commits", replayed);
            }
            manager.checkpoint(&snapshot)?;
        } else {
            // Only stale entries (already checkpointed) can remain
            manager.wal.truncate(snapshot.lsn() + 1)?;
        }

        tracing::info!(
            "Opened storage at {} ({} stores, {} records, lsn {})",
            config.data_dir.display(),
            snapshot.store_count(),
            snapshot.entries(),
            snapshot.lsn()
        );

        Ok((manager, snapshot))
    }

    /// Take the directory lock; a second environment on the same directory
    /// would interleave WAL appends and checkpoints with ours
    fn lock_dir(data_dir: &Path) -> Result<File> {
        let path = data_dir.join(Self::LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            return Err(CellarError::storage_open(
                data_dir,
                format!("data directory is locked by another environment ({})", e),
            ));
        }
        Ok(file)
    }

    /// Give up the directory lock once nothing more will be written
    pub fn release_lock(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            tracing::warn!(
                "Failed to unlock {}: {}",
                self.data_dir.join(Self::LOCK_FILENAME).display(),
                e
            );
        }
    }

    /// Durably log one committed write transaction; returns its LSN
    pub fn log_commit(&mut self, operations: Vec<Operation>) -> Result<u64> {
        self.wal.append(operations)
    }

    /// LSN the next commit will receive
    pub fn next_lsn(&self) -> u64 {
        self.wal.current_lsn()
    }

    /// Whether the WAL has grown past the checkpoint threshold
    pub fn should_checkpoint(&self) -> bool {
        self.wal.size() >= self.checkpoint_threshold
    }

    /// Write `snapshot` as the new checkpoint file and empty the WAL
    ///
    /// `snapshot` must include every logged commit.
    pub fn checkpoint(&mut self, snapshot: &Snapshot) -> Result<ContainerMeta> {
        let next_lsn = self.wal.current_lsn();
        if snapshot.lsn() + 1 < next_lsn {
            return Err(CellarError::Storage(format!(
                "checkpoint at lsn {} would drop logged commits up to {}",
                snapshot.lsn(),
                next_lsn - 1
            )));
        }

        let container_path = self.container_path();
        let tmp_path = container_path.with_extension(Self::TMP_SUFFIX);

        let meta = match ContainerBuilder::write_snapshot(&tmp_path, snapshot) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        fs::rename(&tmp_path, &container_path)?;
        if let Ok(dir) = File::open(&self.data_dir) {
            // Persist the rename; not every platform allows syncing a directory
            let _ = dir.sync_all();
        }

        self.wal.truncate(snapshot.lsn() + 1)?;
        self.checkpoint_lsn = snapshot.lsn();

        tracing::debug!(
            "Checkpoint at lsn {}: {} stores, {} records, {} bytes",
            meta.last_lsn,
            meta.store_count,
            meta.record_count,
            meta.file_size
        );

        Ok(ContainerMeta {
            path: container_path,
            ..meta
        })
    }

    /// Force the WAL to disk
    pub fn sync(&mut self) -> Result<()> {
        self.wal.sync()
    }

    /// LSN folded into the checkpoint file
    pub fn checkpoint_lsn(&self) -> u64 {
        self.checkpoint_lsn
    }

    /// Current WAL size in bytes
    pub fn wal_size(&self) -> u64 {
        self.wal.size()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn container_path(&self) -> PathBuf {
        self.data_dir.join(Self::CONTAINER_FILENAME)
    }
}
