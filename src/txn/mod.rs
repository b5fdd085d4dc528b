//! Transaction Module
//!
//! Scoped read-only or read-write views over an environment.
//!
//! ## Isolation
//! - A read transaction pins the snapshot published when it began and sees
//!   exactly that state for its whole lifetime.
//! - A write transaction holds the writer slot and mutates a private copy of
//!   the committed snapshot. Commit logs its operations to the WAL, then
//!   publishes the copy; abort (or drop) discards it. Nothing is visible to
//!   other transactions before commit.

mod slot;

use std::sync::Arc;

use bytes::Bytes;

use crate::cursor::Cursor;
use crate::env::EnvCore;
use crate::error::{CellarError, Result};
use crate::store::Store;
use crate::tree::{Snapshot, Tree};
use crate::wal::Operation;

pub(crate) use slot::WriterSlot;

/// A read-only or read-write transaction
pub struct Transaction {
    core: Arc<EnvCore>,
    id: u64,
    kind: TxnKind,
    finished: bool,
}

enum TxnKind {
    Read {
        snapshot: Arc<Snapshot>,
    },
    Write {
        /// Private copy of the committed state plus this txn's changes
        working: Snapshot,
        /// Effective operations, in order, for the WAL
        ops: Vec<Operation>,
        /// Running key + value total of `working`
        payload: u64,
    },
}

impl Transaction {
    pub(crate) fn begin_read(core: Arc<EnvCore>) -> Self {
        let snapshot = core.snapshot();
        core.reader_opened();
        let id = core.next_txn_id();
        tracing::trace!("Begin read txn {} at lsn {}", id, snapshot.lsn());

        Self {
            core,
            id,
            kind: TxnKind::Read { snapshot },
            finished: false,
        }
    }

    pub(crate) fn begin_write(core: Arc<EnvCore>) -> Result<Self> {
        core.acquire_writer(core.config.write_wait)?;

        let working = Snapshot::clone(&core.snapshot());
        let payload = working.payload();
        let id = core.next_txn_id();
        tracing::trace!("Begin write txn {} at lsn {}", id, working.lsn());

        Ok(Self {
            core,
            id,
            kind: TxnKind::Write {
                working,
                ops: Vec::new(),
                payload,
            },
            finished: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self.kind, TxnKind::Read { .. })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// LSN of the state this transaction started from
    pub fn lsn(&self) -> u64 {
        self.snapshot().lsn()
    }

    /// The state this transaction sees (including its own writes)
    pub fn snapshot(&self) -> &Snapshot {
        match &self.kind {
            TxnKind::Read { snapshot } => snapshot,
            TxnKind::Write { working, .. } => working,
        }
    }

    /// Whether `store` exists in this transaction's view
    pub fn contains_store(&self, store: &Store) -> bool {
        self.snapshot().contains_store(store.name())
    }

    /// Value (lowest duplicate) stored under `key` in `store`
    pub fn get(&self, store: &Store, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        Ok(self.tree(store.name())?.get(key.as_ref()).cloned())
    }

    /// Number of records in `store`
    pub fn len(&self, store: &Store) -> Result<usize> {
        Ok(self.tree(store.name())?.len())
    }

    /// Open a cursor over `store` that owns this transaction
    pub fn cursor(self, store: &Store) -> Result<Cursor> {
        if self.finished {
            return Err(CellarError::TxnFinished);
        }
        self.tree(store.name())?;
        Ok(Cursor::new(self, store.clone()))
    }

    /// Commit (write) or release (read) the transaction
    pub fn commit(mut self) -> Result<()> {
        self.commit_in_place()
    }

    /// Discard every change made by this transaction
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    // =========================================================================
    // Crate-internal API (cursors, environment)
    // =========================================================================

    pub(crate) fn core(&self) -> &Arc<EnvCore> {
        &self.core
    }

    pub(crate) fn tree(&self, name: &[u8]) -> Result<&Tree> {
        self.snapshot()
            .tree(name)
            .ok_or_else(|| CellarError::StoreNotFound(String::from_utf8_lossy(name).into_owned()))
    }

    /// Apply one operation to the private copy
    ///
    /// Checks the catalog and capacity limits first; on error nothing is
    /// applied. Returns the number of records (or stores) affected; no-ops
    /// are not logged.
    pub(crate) fn apply(&mut self, op: Operation) -> Result<usize> {
        if self.finished {
            return Err(CellarError::TxnFinished);
        }
        let config = &self.core.config;
        let TxnKind::Write {
            working,
            ops,
            payload,
        } = &mut self.kind
        else {
            return Err(CellarError::ReadOnly);
        };

        match &op {
            Operation::CreateStore { name, .. } => {
                if !working.contains_store(name) && working.store_count() >= config.max_stores {
                    tracing::warn!(
                        "Cannot create store {:?}: catalog holds {} stores",
                        String::from_utf8_lossy(name),
                        config.max_stores
                    );
                    return Err(CellarError::StoresFull {
                        max_stores: config.max_stores,
                    });
                }
            }
            Operation::Put { store, key, value } => {
                let growth = working
                    .tree(store)
                    .map_or(0, |tree| tree.growth(key, value));
                let required = *payload + growth;
                if growth > 0 && required > config.map_size {
                    tracing::warn!(
                        "Map full: put needs {} bytes, capacity {}",
                        required,
                        config.map_size
                    );
                    return Err(CellarError::MapFull {
                        required,
                        map_size: config.map_size,
                    });
                }
            }
            Operation::DropStore { .. } | Operation::Delete { .. } => {}
        }

        let name = match &op {
            Operation::CreateStore { name, .. } | Operation::DropStore { name } => name,
            Operation::Put { store, .. } | Operation::Delete { store, .. } => store,
        };
        let before = working.tree(name).map_or(0, Tree::payload);
        let changed = working.apply(&op)?;
        let after = working.tree(name).map_or(0, Tree::payload);
        *payload = *payload - before + after;

        if changed > 0 {
            ops.push(op);
        }
        Ok(changed)
    }

    pub(crate) fn commit_in_place(&mut self) -> Result<()> {
        if self.finished {
            return Err(CellarError::TxnFinished);
        }
        self.finished = true;

        let (working, ops) = match &mut self.kind {
            TxnKind::Read { .. } => {
                self.core.reader_closed();
                return Ok(());
            }
            TxnKind::Write { working, ops, .. } => (std::mem::take(working), std::mem::take(ops)),
        };

        let result = self.publish(working, ops);
        self.core.writer.release();
        result
    }

    pub(crate) fn abort_in_place(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        match &self.kind {
            TxnKind::Read { .. } => self.core.reader_closed(),
            TxnKind::Write { ops, .. } => {
                if !ops.is_empty() {
                    tracing::debug!(
                        "Rolled back write txn {} ({} operations discarded)",
                        self.id,
                        ops.len()
                    );
                }
                self.core.writer.release();
            }
        }
    }

    /// Log, publish, and checkpoint if the WAL has grown too large
    fn publish(&self, mut working: Snapshot, ops: Vec<Operation>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let count = ops.len();
        let mut storage = self.core.storage();
        let lsn = storage.log_commit(ops).map_err(|e| {
            tracing::error!("Commit of write txn {} failed: {}", self.id, e);
            e
        })?;

        working.set_lsn(lsn);
        let published = self.core.publish(working);
        tracing::debug!(
            "Committed write txn {} at lsn {} ({} operations)",
            self.id,
            lsn,
            count
        );

        if storage.should_checkpoint() {
            // The commit is already durable in the WAL
            if let Err(e) = storage.checkpoint(&published) {
                tracing::warn!("Automatic checkpoint after lsn {} failed: {}", lsn, e);
            }
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.is_readonly() {
            tracing::debug!("Write txn {} dropped without commit", self.id);
        }
        self.abort_in_place();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("readonly", &self.is_readonly())
            .field("lsn", &self.lsn())
            .field("finished", &self.finished)
            .finish()
    }
}
