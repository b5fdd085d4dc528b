//! Store Module
//!
//! A named, ordered key-value sub-database inside an environment.
//!
//! Every convenience method opens its own transaction and cursor, and
//! finishes both before returning: writes are committed (their error is
//! returned), reads are released. For multi-step sequences hold a cursor
//! from [`Store::cursor`] instead.

use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::cursor::{Cursor, Iter};
use crate::env::EnvInner;
use crate::error::{CellarError, Result};
use crate::txn::Transaction;

/// Handle to a named store; cheap to clone
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    name: Bytes,
    /// Fixed at creation
    duplicates: bool,
    /// Back-reference to the owning environment
    env: Weak<EnvInner>,
}

impl Store {
    pub(crate) fn new(name: Bytes, duplicates: bool, env: Weak<EnvInner>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name,
                duplicates,
                env,
            }),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.inner.name
    }

    /// Name rendered as UTF-8 (lossy), for display
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.name).into_owned()
    }

    pub fn is_duplicates(&self) -> bool {
        self.inner.duplicates
    }

    /// Whether two handles are the same registration
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open a cursor on a fresh transaction of the requested mode
    pub fn cursor(&self, readonly: bool) -> Result<Cursor> {
        let env = self.inner.env.upgrade().ok_or(CellarError::NotRunning)?;
        let core = env.core()?;
        let txn = if readonly {
            Transaction::begin_read(core)
        } else {
            Transaction::begin_write(core)?
        };
        txn.cursor(self)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upsert `key` (unique mode) or add `value` to its duplicates
    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let mut cursor = self.cursor(false)?;
        cursor.put(key, value)?;
        cursor.commit()
    }

    /// Delete `key` and all of its values; reports whether it existed
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let mut cursor = self.cursor(false)?;
        let removed = cursor.remove(key)?;
        cursor.commit()?;
        Ok(removed)
    }

    /// Append `value` under a new time-ordered key; see [`Cursor::post`]
    pub fn post(&self, value: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let mut cursor = self.cursor(false)?;
        let key = cursor.post(value)?;
        cursor.commit()?;
        Ok(key)
    }

    /// Remove and return the lowest record; see [`Cursor::pop`]
    pub fn pop(&self) -> Result<Option<(Bytes, Bytes)>> {
        let mut cursor = self.cursor(false)?;
        let record = cursor.pop()?;
        cursor.commit()?;
        Ok(record)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value (lowest duplicate) for `key`, or `None`
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        Ok(self.cursor(true)?.get(key))
    }

    /// Value for `key`; `DataNotFound` if absent
    pub fn load(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        self.cursor(true)?.load(key)
    }

    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.cursor(true)?.exists(key))
    }

    /// All values under `key`, sorted
    pub fn values(&self, key: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        let mut cursor = self.cursor(true)?;
        Ok(cursor.iter_dup(key).map(|(_, value)| value).collect())
    }

    /// Number of records, duplicates counted individually
    pub fn len(&self) -> Result<usize> {
        self.cursor(true)?.transaction().len(self)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Iteration (each iterator owns a read snapshot)
    // =========================================================================

    pub fn iter(&self) -> Result<Iter<Cursor>> {
        Ok(Iter::forward(self.cursor(true)?))
    }

    pub fn iter_rev(&self) -> Result<Iter<Cursor>> {
        Ok(Iter::reverse(self.cursor(true)?))
    }

    pub fn iter_from(&self, key: impl AsRef<[u8]>) -> Result<Iter<Cursor>> {
        Ok(Iter::from_key(self.cursor(true)?, key.as_ref()))
    }

    pub fn iter_dup(&self, key: impl AsRef<[u8]>) -> Result<Iter<Cursor>> {
        Ok(Iter::dups(self.cursor(true)?, key.as_ref()))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name_lossy())
            .field("duplicates", &self.inner.duplicates)
            .finish()
    }
}
