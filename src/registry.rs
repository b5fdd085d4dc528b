//! Store registry facade
//!
//! The narrow contract other subsystems depend on. Construct one
//! [`Environment`] at startup and hand consumers an
//! `Arc<dyn StoreRegistry>` (or a generic `R: StoreRegistry`) instead of
//! letting them look the environment up globally.

use bytes::Bytes;

use crate::env::Environment;
use crate::error::Result;
use crate::store::Store;

/// Named-store lookup and lifecycle
pub trait StoreRegistry: Send + Sync {
    /// Registered store names, sorted
    fn names(&self) -> Vec<Bytes>;

    /// Return the store, creating it (unique mode) if absent
    fn create(&self, name: &[u8]) -> Result<Store>;

    /// Remove the store and all of its records; false if absent
    fn remove(&self, name: &[u8]) -> Result<bool>;

    /// Registered store, without creating it
    fn get(&self, name: &[u8]) -> Result<Option<Store>>;
}

impl StoreRegistry for Environment {
    fn names(&self) -> Vec<Bytes> {
        self.store_names()
    }

    fn create(&self, name: &[u8]) -> Result<Store> {
        self.create_store(name, false)
    }

    fn remove(&self, name: &[u8]) -> Result<bool> {
        self.remove_store(name)
    }

    fn get(&self, name: &[u8]) -> Result<Option<Store>> {
        self.get_store(name, false)
    }
}
