//! Environment Module
//!
//! The top-level handle to the on-disk multi-store container.
//!
//! ## Responsibilities
//! - Open/close the backing container (`start` / `stop`)
//! - Keep the registry of named stores, rebuilt from the catalog on start
//! - Create and remove stores, each as one write transaction
//! - Issue read and write transactions

mod runtime;
mod stat;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::{Config, WriteWait};
use crate::error::{CellarError, Result};
use crate::storage::{ContainerMeta, StorageManager};
use crate::store::Store;
use crate::txn::Transaction;
use crate::wal::Operation;

pub(crate) use runtime::EnvCore;
pub use stat::{EnvStat, StoreStat};

/// Handle to a CellarKV environment; clones share the same container
///
/// ```no_run
/// use cellarkv::{Config, Environment};
///
/// let env = Environment::open(Config::builder().data_dir("./data").build())?;
/// let users = env.create_store("users", false)?;
/// users.put("alice", "admin")?;
/// assert_eq!(users.get("alice")?.as_deref(), Some(&b"admin"[..]));
/// env.stop()?;
/// # Ok::<(), cellarkv::CellarError>(())
/// ```
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

pub(crate) struct EnvInner {
    config: Config,
    state: RwLock<EnvState>,
    /// name → handle; mirrors the committed catalog
    registry: RwLock<BTreeMap<Bytes, Store>>,
}

enum EnvState {
    Created,
    Running(Arc<EnvCore>),
    Stopped,
}

impl EnvInner {
    /// Core of the running environment
    pub(crate) fn core(&self) -> Result<Arc<EnvCore>> {
        match &*self.state.read() {
            EnvState::Running(core) => Ok(Arc::clone(core)),
            EnvState::Created | EnvState::Stopped => Err(CellarError::NotRunning),
        }
    }
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        let EnvState::Running(core) = &*self.state.get_mut() else {
            return;
        };
        // A writer may still be alive on this thread; never wait for it here
        match core.shutdown(WriteWait::FailFast) {
            Ok(_) => tracing::debug!(
                "Environment at {} closed on drop",
                self.config.data_dir.display()
            ),
            Err(e) => tracing::warn!(
                "Environment at {} dropped without final checkpoint: {}",
                self.config.data_dir.display(),
                e
            ),
        }
    }
}

impl Environment {
    /// Create an environment in the `Created` state; call `start` next
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EnvInner {
                config,
                state: RwLock::new(EnvState::Created),
                registry: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// `new` + `start`
    pub fn open(config: Config) -> Result<Self> {
        let env = Self::new(config)?;
        env.start()?;
        Ok(env)
    }

    /// Open or create the backing container and register every store
    ///
    /// Fails with `StorageOpen` if the directory is inaccessible, the
    /// container is corrupt, or it exceeds the configured limits. Calling
    /// `start` on a running environment is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if let EnvState::Running(_) = &*state {
            tracing::debug!("Environment already running");
            return Ok(());
        }

        let config = &self.inner.config;
        let (storage, snapshot) = StorageManager::open(config)?;

        {
            let mut registry = self.inner.registry.write();
            registry.clear();
            for (name, tree) in snapshot.stores() {
                registry.insert(name.clone(), self.store_handle(name.clone(), tree.duplicates()));
            }
        }

        tracing::info!(
            "Environment started at {} with {} stores",
            config.data_dir.display(),
            snapshot.store_count()
        );
        *state = EnvState::Running(Arc::new(EnvCore::new(config.clone(), storage, snapshot)));
        Ok(())
    }

    /// Flush everything to the container and close it
    ///
    /// Waits for an active write transaction to finish, so it must not be
    /// called from a thread that holds a write cursor. A second call is a
    /// no-op.
    pub fn stop(&self) -> Result<()> {
        let core = {
            let mut state = self.inner.state.write();
            match std::mem::replace(&mut *state, EnvState::Stopped) {
                EnvState::Running(core) => core,
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };

        self.inner.registry.write().clear();
        core.shutdown(WriteWait::Block).map_err(|e| {
            tracing::error!("Failed to flush environment on stop: {}", e);
            e
        })?;
        tracing::info!("Environment at {} stopped", self.inner.config.data_dir.display());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.inner.state.read(), EnvState::Running(_))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    fn core(&self) -> Result<Arc<EnvCore>> {
        self.inner.core()
    }

    fn store_handle(&self, name: Bytes, duplicates: bool) -> Store {
        Store::new(name, duplicates, Arc::downgrade(&self.inner))
    }

    // =========================================================================
    // Store Catalog
    // =========================================================================

    /// Return the store named `name`, creating it if absent
    ///
    /// An existing store keeps the duplicate mode it was created with.
    pub fn create_store(&self, name: impl AsRef<[u8]>, duplicates: bool) -> Result<Store> {
        let name = name.as_ref();
        if let Some(store) = self.lookup(name) {
            warn_mode_mismatch(&store, duplicates);
            return Ok(store);
        }

        // Lock order: writer slot, then registry
        let core = self.core()?;
        let mut txn = Transaction::begin_write(core)?;
        let mut registry = self.inner.registry.write();
        if let Some(store) = registry.get(name) {
            warn_mode_mismatch(store, duplicates);
            return Ok(store.clone());
        }

        txn.apply(Operation::CreateStore {
            name: name.to_vec(),
            duplicates,
        })?;
        txn.commit().map_err(|e| {
            tracing::error!(
                "Failed to create store {:?}: {}",
                String::from_utf8_lossy(name),
                e
            );
            e
        })?;

        let key = Bytes::copy_from_slice(name);
        let store = self.store_handle(key.clone(), duplicates);
        registry.insert(key, store.clone());
        tracing::info!(
            "Created store {:?} (duplicates: {})",
            store.name_lossy(),
            duplicates
        );
        Ok(store)
    }

    /// Registered store, or (with `create`) a newly created unique-mode one
    pub fn get_store(&self, name: impl AsRef<[u8]>, create: bool) -> Result<Option<Store>> {
        let name = name.as_ref();
        match self.lookup(name) {
            Some(store) => Ok(Some(store)),
            None if create => self.create_store(name, false).map(Some),
            None => {
                self.core()?;
                Ok(None)
            }
        }
    }

    /// Erase every record of `name` and unregister it, atomically
    ///
    /// Returns false if no such store exists.
    pub fn remove_store(&self, name: impl AsRef<[u8]>) -> Result<bool> {
        let name = name.as_ref();
        if self.lookup(name).is_none() {
            self.core()?;
            return Ok(false);
        }

        let core = self.core()?;
        let mut txn = Transaction::begin_write(core)?;
        let mut registry = self.inner.registry.write();
        if !registry.contains_key(name) {
            return Ok(false);
        }

        txn.apply(Operation::DropStore {
            name: name.to_vec(),
        })?;
        txn.commit().map_err(|e| {
            tracing::error!(
                "Failed to remove store {:?}: {}",
                String::from_utf8_lossy(name),
                e
            );
            e
        })?;

        registry.remove(name);
        tracing::info!("Removed store {:?}", String::from_utf8_lossy(name));
        Ok(true)
    }

    /// Remove every store in one transaction; returns how many were removed
    pub fn remove_all_stores(&self) -> Result<usize> {
        let core = self.core()?;
        let mut txn = Transaction::begin_write(core)?;
        let mut registry = self.inner.registry.write();

        let names: Vec<Bytes> = registry.keys().cloned().collect();
        for name in &names {
            txn.apply(Operation::DropStore {
                name: name.to_vec(),
            })?;
        }
        txn.commit()?;

        registry.clear();
        if !names.is_empty() {
            tracing::info!("Removed all {} stores", names.len());
        }
        Ok(names.len())
    }

    pub fn store_exists(&self, name: impl AsRef<[u8]>) -> bool {
        self.inner.registry.read().contains_key(name.as_ref())
    }

    /// Registered store names, sorted; a copy, not a live view
    pub fn store_names(&self) -> Vec<Bytes> {
        self.inner.registry.read().keys().cloned().collect()
    }

    fn lookup(&self, name: &[u8]) -> Option<Store> {
        self.inner.registry.read().get(name).cloned()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Read-only transaction over the current committed state
    pub fn begin_read(&self) -> Result<Transaction> {
        Ok(Transaction::begin_read(self.core()?))
    }

    /// Write transaction; waits per `Config::write_wait`
    pub fn begin_write(&self) -> Result<Transaction> {
        Transaction::begin_write(self.core()?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Fold the WAL into a new checkpoint file
    pub fn checkpoint(&self) -> Result<ContainerMeta> {
        self.core()?.checkpoint(self.inner.config.write_wait)
    }

    /// Aggregate counts and sizes; best-effort, for observability
    pub fn stat(&self) -> Result<EnvStat> {
        let core = self.core()?;
        let snapshot = core.snapshot();
        let wal_bytes = core.storage().wal_size();
        Ok(EnvStat::collect(
            &snapshot,
            &self.inner.config,
            core.active_readers(),
            wal_bytes,
        ))
    }
}

fn warn_mode_mismatch(store: &Store, duplicates: bool) {
    if store.is_duplicates() != duplicates {
        tracing::warn!(
            "Store {:?} exists with duplicates={}; ignoring requested duplicates={}",
            store.name_lossy(),
            store.is_duplicates(),
            duplicates
        );
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("data_dir", &self.inner.config.data_dir)
            .field("running", &self.is_running())
            .finish()
    }
}
