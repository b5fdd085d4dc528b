//! Cursor Module
//!
//! A positioned iterator bound to one transaction and one store.
//!
//! ## State Machine
//! ```text
//!                 first/last/next/prev/seek/seek_range/put
//!  Unpositioned ──────────────────────────────────────────▶ Positioned(key, value)
//!       │                                                   │        ▲
//!       │ first/last on empty store,                        │        │ next/prev/seek...
//!       │ seek_range past the last key                      ▼        │
//!       └──────────────────────────────────────────────────▶ End ────┘
//! ```
//!
//! Within a duplicate group, `next`/`prev` visit each value (in sorted
//! order) before moving to the neighbouring key.
//!
//! ## Scoping
//! A cursor owns its transaction. Dropping a write cursor commits it unless
//! a mutation failed, in which case it rolls back. Use [`Cursor::commit`] to
//! observe the commit result.

use std::borrow::BorrowMut;

use bytes::Bytes;

use crate::error::{CellarError, Result};
use crate::store::Store;
use crate::tree::{RecordRef, Tree};
use crate::txn::Transaction;
use crate::wal::Operation;

/// Where a cursor currently points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    At { key: Bytes, value: Bytes },
    End,
}

impl Position {
    fn from_record(record: Option<RecordRef<'_>>) -> Self {
        match record {
            Some((key, value)) => Position::At {
                key: key.clone(),
                value: value.clone(),
            },
            None => Position::End,
        }
    }
}

/// Positioned iterator over one store
pub struct Cursor {
    txn: Transaction,
    store: Store,
    position: Position,
    /// A mutation returned an error; drop rolls back instead of committing
    failed: bool,
}

impl Cursor {
    pub(crate) fn new(txn: Transaction, store: Store) -> Self {
        Self {
            txn,
            store,
            position: Position::Unpositioned,
            failed: false,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_readonly(&self) -> bool {
        self.txn.is_readonly()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// True when positioned on a record
    pub fn is_positioned(&self) -> bool {
        matches!(self.position, Position::At { .. })
    }

    /// True after the cursor ran off either end of the store
    pub fn is_end(&self) -> bool {
        self.position == Position::End
    }

    fn tree(&self) -> Option<&Tree> {
        self.txn.snapshot().tree(self.store.name())
    }

    fn settle(&mut self, position: Position) -> bool {
        self.position = position;
        self.is_positioned()
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    /// Move to the lowest record; `End` if the store is empty
    pub fn first(&mut self) -> bool {
        let position = Position::from_record(self.tree().and_then(Tree::first));
        self.settle(position)
    }

    /// Move to the highest record; `End` if the store is empty
    pub fn last(&mut self) -> bool {
        let position = Position::from_record(self.tree().and_then(Tree::last));
        self.settle(position)
    }

    /// Advance one record (from `Unpositioned`, same as `first`)
    pub fn next(&mut self) -> bool {
        let position = match &self.position {
            Position::Unpositioned => None,
            Position::End => Some(Position::End),
            Position::At { key, value } => Some(Position::from_record(
                self.tree().and_then(|t| t.successor(key, value)),
            )),
        };
        match position {
            Some(position) => self.settle(position),
            None => self.first(),
        }
    }

    /// Retreat one record (from `Unpositioned` or `End`, same as `last`)
    pub fn prev(&mut self) -> bool {
        let position = match &self.position {
            Position::Unpositioned | Position::End => None,
            Position::At { key, value } => Some(Position::from_record(
                self.tree().and_then(|t| t.predecessor(key, value)),
            )),
        };
        match position {
            Some(position) => self.settle(position),
            None => self.last(),
        }
    }

    /// Position on `key` (its first duplicate) if present
    ///
    /// On a miss the position is left unchanged and false is returned.
    pub fn seek(&mut self, key: impl AsRef<[u8]>) -> bool {
        let found = self
            .tree()
            .and_then(|t| t.first_dup(key.as_ref()))
            .map(|record| Position::from_record(Some(record)));
        match found {
            Some(position) => self.settle(position),
            None => false,
        }
    }

    /// Position on the smallest key `>= key`; `End` if there is none
    pub fn seek_range(&mut self, key: impl AsRef<[u8]>) -> bool {
        let position = Position::from_record(self.tree().and_then(|t| t.ceiling(key.as_ref())));
        self.settle(position)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Key at the current position (`None` when unpositioned or at end)
    pub fn key(&self) -> Option<&Bytes> {
        match &self.position {
            Position::At { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Value at the current position (`None` when unpositioned or at end)
    pub fn value(&self) -> Option<&Bytes> {
        match &self.position {
            Position::At { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Current (key, value) pair
    pub fn record(&self) -> Option<(Bytes, Bytes)> {
        match &self.position {
            Position::At { key, value } => Some((key.clone(), value.clone())),
            _ => None,
        }
    }

    /// `seek` + `value`; never errors on a miss
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Option<Bytes> {
        if self.seek(key) {
            self.value().cloned()
        } else {
            None
        }
    }

    /// Like `get`, but a missing key is `DataNotFound`
    pub fn load(&mut self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        let key = key.as_ref();
        self.get(key).ok_or_else(|| CellarError::data_not_found(key))
    }

    /// `seek` and report presence
    pub fn exists(&mut self, key: impl AsRef<[u8]>) -> bool {
        self.seek(key)
    }

    /// Number of values under the current key (0 when not positioned)
    pub fn count(&self) -> usize {
        match (&self.position, self.tree()) {
            (Position::At { key, .. }, Some(tree)) => tree.count(key),
            _ => 0,
        }
    }

    // =========================================================================
    // Mutations (write cursors only)
    // =========================================================================

    fn mutate(&mut self, op: Operation) -> Result<usize> {
        self.txn.apply(op).map_err(|e| {
            if !matches!(e, CellarError::ReadOnly) {
                self.failed = true;
                tracing::error!(
                    "Mutation on store {:?} failed: {}",
                    self.store.name_lossy(),
                    e
                );
            }
            e
        })
    }

    /// Insert a record and position on it
    ///
    /// Unique stores replace the key's value; duplicate stores add `value`
    /// to the key's set. Returns false when the exact record already existed.
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let (key, value) = (key.as_ref(), value.as_ref());
        let changed = self.mutate(Operation::Put {
            store: self.store.name().to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.position = Position::At {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        };
        Ok(changed > 0)
    }

    /// Delete the current key (all of its duplicates) and advance to the
    /// next key; false if not positioned
    pub fn delete(&mut self) -> Result<bool> {
        let Position::At { key, .. } = self.position.clone() else {
            return Ok(false);
        };
        let removed = self.mutate(Operation::Delete {
            store: self.store.name().to_vec(),
            key: key.to_vec(),
            value: None,
        })?;
        let position = Position::from_record(self.tree().and_then(|t| t.after_key(&key)));
        self.settle(position);
        Ok(removed > 0)
    }

    /// `seek` + `delete`; reports whether anything was removed
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        if !self.seek(key) {
            return Ok(false);
        }
        self.delete()
    }

    /// Store `value` under a freshly generated, time-ordered key
    ///
    /// Returns the new key, or `None` if the generated key was already taken.
    pub fn post(&mut self, value: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = self.txn.core().keys.next_key();
        if self.tree().map_or(false, |t| t.contains_key(&key)) {
            tracing::warn!("Generated key {:?} already exists", key);
            return Ok(None);
        }
        self.put(&key, value)?;
        Ok(Some(key))
    }

    /// Remove and return the lowest record (FIFO dequeue)
    ///
    /// Only that (key, value) pair is removed; other duplicates of the key
    /// stay. The cursor is left on the new first record.
    pub fn pop(&mut self) -> Result<Option<(Bytes, Bytes)>> {
        if !self.first() {
            return Ok(None);
        }
        let Some((key, value)) = self.record() else {
            return Ok(None);
        };
        self.mutate(Operation::Delete {
            store: self.store.name().to_vec(),
            key: key.to_vec(),
            value: Some(value.to_vec()),
        })?;
        self.first();
        Ok(Some((key, value)))
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Every record in order
    pub fn iter(&mut self) -> Iter<&mut Cursor> {
        Iter::forward(self)
    }

    /// Every record in reverse order
    pub fn iter_rev(&mut self) -> Iter<&mut Cursor> {
        Iter::reverse(self)
    }

    /// Records with keys `>= key`, in order
    pub fn iter_from(&mut self, key: impl AsRef<[u8]>) -> Iter<&mut Cursor> {
        Iter::from_key(self, key.as_ref())
    }

    /// The values stored under `key`, in sorted order
    pub fn iter_dup(&mut self, key: impl AsRef<[u8]>) -> Iter<&mut Cursor> {
        Iter::dups(self, key.as_ref())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Commit (write) or release (read) the cursor's transaction
    pub fn commit(mut self) -> Result<()> {
        if self.failed {
            self.txn.abort_in_place();
            return Err(CellarError::Storage(
                "transaction rolled back after a failed mutation".to_string(),
            ));
        }
        self.txn.commit_in_place()
    }

    /// Discard the cursor's changes
    pub fn abort(mut self) {
        self.txn.abort_in_place();
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.txn.is_finished() {
            return;
        }
        if self.txn.is_readonly() {
            self.txn.abort_in_place();
        } else if self.failed {
            tracing::debug!(
                "Rolling back write cursor on store {:?} after failed mutation",
                self.store.name_lossy()
            );
            self.txn.abort_in_place();
        } else if let Err(e) = self.txn.commit_in_place() {
            tracing::error!(
                "Commit on drop of write cursor on store {:?} failed: {}",
                self.store.name_lossy(),
                e
            );
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("store", &self.store.name_lossy())
            .field("txn", &self.txn)
            .field("position", &self.position)
            .finish()
    }
}

// =============================================================================
// Iterator
// =============================================================================

enum Start {
    First,
    Last,
    Range(Bytes),
    Dup(Bytes),
}

/// Iterator over (key, value) pairs driven by a cursor
///
/// `C` is `&mut Cursor` for borrowed iteration or `Cursor` for an owning
/// iterator (see `Store::iter`).
pub struct Iter<C: BorrowMut<Cursor>> {
    cursor: C,
    start: Option<Start>,
    reverse: bool,
    /// Restricts iteration to one key's duplicates
    dup_key: Option<Bytes>,
    done: bool,
}

impl<C: BorrowMut<Cursor>> Iter<C> {
    fn new(cursor: C, start: Start) -> Self {
        let reverse = matches!(start, Start::Last);
        Self {
            cursor,
            start: Some(start),
            reverse,
            dup_key: None,
            done: false,
        }
    }

    pub(crate) fn forward(cursor: C) -> Self {
        Self::new(cursor, Start::First)
    }

    pub(crate) fn reverse(cursor: C) -> Self {
        Self::new(cursor, Start::Last)
    }

    pub(crate) fn from_key(cursor: C, key: &[u8]) -> Self {
        Self::new(cursor, Start::Range(Bytes::copy_from_slice(key)))
    }

    pub(crate) fn dups(cursor: C, key: &[u8]) -> Self {
        Self::new(cursor, Start::Dup(Bytes::copy_from_slice(key)))
    }
}

impl<C: BorrowMut<Cursor>> Iterator for Iter<C> {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let cursor = self.cursor.borrow_mut();

        let positioned = match self.start.take() {
            Some(Start::First) => cursor.first(),
            Some(Start::Last) => cursor.last(),
            Some(Start::Range(key)) => cursor.seek_range(key),
            Some(Start::Dup(key)) => {
                let found = cursor.seek(&key);
                self.dup_key = Some(key);
                found
            }
            None if self.reverse => cursor.prev(),
            None => cursor.next(),
        };

        let record = if positioned { cursor.record() } else { None };
        match (record, &self.dup_key) {
            (Some((key, _)), Some(dup_key)) if key != *dup_key => {
                self.done = true;
                None
            }
            (Some(record), _) => Some(record),
            (None, _) => {
                self.done = true;
                None
            }
        }
    }
}

impl<C: BorrowMut<Cursor>> std::iter::FusedIterator for Iter<C> {}
