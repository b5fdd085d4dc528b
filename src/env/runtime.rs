//! Shared state of a running environment.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::config::{Config, WriteWait};
use crate::error::{CellarError, Result};
use crate::keys::{KeyGenerator, MAX_KEY};
use crate::storage::{ContainerMeta, StorageManager};
use crate::tree::Snapshot;
use crate::txn::WriterSlot;

/// Everything a transaction needs from a running environment
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes**: serialized by `writer`. Lock order is writer slot →
///   registry → `storage` → `committed`.
/// - **Reads**: clone the `Arc<Snapshot>` out of `committed` and never
///   touch a lock again for the rest of the transaction.
pub(crate) struct EnvCore {
    pub(crate) config: Config,

    /// Last published snapshot
    committed: RwLock<Arc<Snapshot>>,

    /// Single-writer guard
    pub(crate) writer: WriterSlot,

    /// Checkpoint file + WAL
    storage: Mutex<StorageManager>,

    /// Set once the environment has stopped; no further commits
    closed: AtomicBool,

    next_txn_id: AtomicU64,
    active_readers: AtomicUsize,

    /// Generator for `post()` keys
    pub(crate) keys: KeyGenerator,
}

impl EnvCore {
    pub fn new(config: Config, storage: StorageManager, snapshot: Snapshot) -> Self {
        let keys = KeyGenerator::new();
        for (_, tree) in snapshot.stores() {
            // The highest generated key sits at or below MAX_KEY
            if let Some(key) = tree.keys_down_from(MAX_KEY).find(|k| keys.observe(k)) {
                tracing::debug!("Post keys continue after {:?}", String::from_utf8_lossy(key));
            }
        }

        Self {
            config,
            committed: RwLock::new(Arc::new(snapshot)),
            writer: WriterSlot::new(),
            storage: Mutex::new(storage),
            closed: AtomicBool::new(false),
            next_txn_id: AtomicU64::new(1),
            active_readers: AtomicUsize::new(0),
            keys,
        }
    }

    /// Current committed snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.committed.read())
    }

    /// Make `snapshot` the committed state; caller holds the writer slot
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.committed.write() = Arc::clone(&snapshot);
        snapshot
    }

    pub fn storage(&self) -> MutexGuard<'_, StorageManager> {
        self.storage.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reader_opened(&self) {
        self.active_readers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reader_closed(&self) {
        self.active_readers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::Relaxed)
    }

    /// Take the writer slot, failing if the environment has stopped
    pub fn acquire_writer(&self, wait: WriteWait) -> Result<()> {
        if self.is_closed() {
            return Err(CellarError::NotRunning);
        }
        self.writer.acquire(wait)?;
        if self.is_closed() {
            self.writer.release();
            return Err(CellarError::NotRunning);
        }
        Ok(())
    }

    /// Checkpoint the committed snapshot under the writer slot
    pub fn checkpoint(&self, wait: WriteWait) -> Result<ContainerMeta> {
        self.acquire_writer(wait)?;
        let result = self.storage().checkpoint(&self.snapshot());
        self.writer.release();
        result
    }

    /// Wait for the active writer, checkpoint, refuse further commits and
    /// unlock the data directory
    ///
    /// Returns `Ok(false)` if the core was already closed.
    pub fn shutdown(&self, wait: WriteWait) -> Result<bool> {
        self.writer.acquire(wait)?;
        if self.closed.swap(true, Ordering::AcqRel) {
            self.writer.release();
            return Ok(false);
        }

        let result = {
            let mut storage = self.storage();
            let result = storage
                .checkpoint(&self.snapshot())
                .and_then(|_| storage.sync());
            // Closed: nothing can write through this core any more
            storage.release_lock();
            result
        };
        self.writer.release();
        result.map(|_| true)
    }
}
