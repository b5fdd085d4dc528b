//! Snapshot
//!
//! A versioned, immutable-once-published view of every store.
//!
//! Readers hold an `Arc<Snapshot>`; the single writer clones the published
//! snapshot (cheap: one `Arc` per store) and detaches a store's tree the
//! first time it mutates it (`Arc::make_mut`). Trees are persistent, so the
//! detached copy shares all untouched nodes with the published one.
//! Publishing the writer's copy on commit never disturbs readers pinned to
//! older versions.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{CellarError, Result};
use crate::wal::Operation;

use super::Tree;

/// Consistent view of all stores as of one commit
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// LSN of the last commit folded into this view (0 = empty environment)
    lsn: u64,

    /// Catalog: store name → records
    trees: BTreeMap<Bytes, Arc<Tree>>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    pub(crate) fn set_lsn(&mut self, lsn: u64) {
        self.lsn = lsn;
    }

    // =========================================================================
    // Catalog Access
    // =========================================================================

    pub fn tree(&self, name: &[u8]) -> Option<&Tree> {
        self.trees.get(name).map(Arc::as_ref)
    }

    /// Mutable access to a store's tree, detaching it if readers share it
    pub(crate) fn tree_mut(&mut self, name: &[u8]) -> Option<&mut Tree> {
        self.trees.get_mut(name).map(Arc::make_mut)
    }

    pub fn contains_store(&self, name: &[u8]) -> bool {
        self.trees.contains_key(name)
    }

    pub fn store_count(&self) -> usize {
        self.trees.len()
    }

    /// Iterate (name, tree) in name order
    pub fn stores(&self) -> impl Iterator<Item = (&Bytes, &Tree)> + '_ {
        self.trees.iter().map(|(name, tree)| (name, tree.as_ref()))
    }

    /// Total key + value bytes across all stores
    pub fn payload(&self) -> u64 {
        self.trees.values().map(|tree| tree.payload()).sum()
    }

    /// Total record count across all stores
    pub fn entries(&self) -> usize {
        self.trees.values().map(|tree| tree.len()).sum()
    }

    /// Install a fully built tree (used when loading the container)
    pub(crate) fn insert_tree(&mut self, name: Bytes, tree: Tree) {
        self.trees.insert(name, Arc::new(tree));
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply one logged operation
    ///
    /// Returns the number of records (or stores) affected; 0 means the
    /// operation was a no-op and need not be logged.
    pub fn apply(&mut self, op: &Operation) -> Result<usize> {
        match op {
            Operation::CreateStore { name, duplicates } => {
                if self.trees.contains_key(name.as_slice()) {
                    return Ok(0);
                }
                self.trees
                    .insert(Bytes::copy_from_slice(name), Arc::new(Tree::new(*duplicates)));
                Ok(1)
            }
            Operation::DropStore { name } => {
                Ok(self.trees.remove(name.as_slice()).map_or(0, |_| 1))
            }
            Operation::Put { store, key, value } => {
                let tree = self.require_tree(store)?;
                let changed = tree.put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
                Ok(changed as usize)
            }
            Operation::Delete { store, key, value } => {
                let tree = self.require_tree(store)?;
                let removed = match value {
                    Some(value) => tree.delete_value(key, value) as usize,
                    None => tree.delete_key(key),
                };
                Ok(removed)
            }
        }
    }

    fn require_tree(&mut self, name: &[u8]) -> Result<&mut Tree> {
        self.tree_mut(name)
            .ok_or_else(|| CellarError::StoreNotFound(String::from_utf8_lossy(name).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &str, key: &str, value: &str) -> Operation {
        Operation::Put {
            store: store.as_bytes().to_vec(),
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut base = Snapshot::new();
        base.apply(&Operation::CreateStore {
            name: b"s".to_vec(),
            duplicates: false,
        })
        .unwrap();
        base.apply(&put("s", "a", "1")).unwrap();

        let mut working = base.clone();
        working.apply(&put("s", "b", "2")).unwrap();

        assert_eq!(base.tree(b"s").unwrap().len(), 1);
        assert_eq!(working.tree(b"s").unwrap().len(), 2);
    }

    #[test]
    fn test_apply_to_missing_store_fails() {
        let mut snapshot = Snapshot::new();
        let result = snapshot.apply(&put("nope", "a", "1"));
        assert!(matches!(result, Err(CellarError::StoreNotFound(_))));
    }

    #[test]
    fn test_create_store_is_idempotent() {
        let mut snapshot = Snapshot::new();
        let op = Operation::CreateStore {
            name: b"s".to_vec(),
            duplicates: true,
        };
        assert_eq!(snapshot.apply(&op).unwrap(), 1);
        assert_eq!(snapshot.apply(&op).unwrap(), 0);
        assert_eq!(snapshot.store_count(), 1);
    }
}
