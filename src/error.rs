//! Error types for CellarKV
//!
//! Provides a unified error type for all operations.
//!
//! Three families matter to callers:
//! - [`CellarError::StorageOpen`]: the backing container could not be opened
//! - the general storage family (see [`CellarError::is_storage_error`])
//! - [`CellarError::DataNotFound`]: raised only by the `load` accessors

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CellarError
pub type Result<T> = std::result::Result<T, CellarError>;

/// Unified error type for CellarKV operations
#[derive(Debug, Error)]
pub enum CellarError {
    // -------------------------------------------------------------------------
    // Startup Errors
    // -------------------------------------------------------------------------
    #[error("Failed to open storage at {}: {reason}", path.display())]
    StorageOpen { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // On-disk Format Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("Container corruption detected: {0}")]
    ContainerCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Map full: {required} bytes required, capacity is {map_size}")]
    MapFull { required: u64, map_size: u64 },

    #[error("Store catalog full: at most {max_stores} stores")]
    StoresFull { max_stores: usize },

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Environment is not running")]
    NotRunning,

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Another write transaction is active")]
    WriterBusy,

    #[error("Mutation attempted through a read-only transaction")]
    ReadOnly,

    #[error("Transaction already finished")]
    TxnFinished,

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Data not found for key {0}")]
    DataNotFound(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CellarError {
    /// Build a `StorageOpen` error for `path` from any displayable cause
    pub fn storage_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CellarError::StorageOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `DataNotFound` error, rendering the key lossily as UTF-8
    pub fn data_not_found(key: &[u8]) -> Self {
        CellarError::DataNotFound(String::from_utf8_lossy(key).into_owned())
    }

    /// True for the general storage family (engine failures during
    /// store creation/removal, mutation or commit).
    pub fn is_storage_error(&self) -> bool {
        !matches!(
            self,
            CellarError::StorageOpen { .. } | CellarError::DataNotFound(_) | CellarError::Config(_)
        )
    }
}

impl From<bincode::Error> for CellarError {
    fn from(err: bincode::Error) -> Self {
        CellarError::Serialization(err.to_string())
    }
}
