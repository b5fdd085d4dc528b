//! Configuration for CellarKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CellarError, Result};

/// Main configuration for a CellarKV environment
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the backing container
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── data.ckv         (checkpointed stores)
    ///     └── wal.log          (write-ahead log of commits since checkpoint)
    pub data_dir: PathBuf,

    /// Maximum number of named stores in the catalog
    pub max_stores: usize,

    /// Capacity ceiling: total key + value bytes the environment may hold
    pub map_size: u64,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size (in bytes) after which a commit triggers a checkpoint
    pub checkpoint_threshold: u64,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// What a write transaction does when another writer holds the slot
    pub write_wait: WriteWait,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every commit (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced commits (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Behaviour of `begin_write` under writer contention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteWait {
    /// Block until the active writer finishes
    Block,

    /// Fail immediately with `WriterBusy`
    FailFast,

    /// Wait up to `ms` milliseconds, then fail with `WriterBusy`
    Timeout { ms: u64 },
}

impl WriteWait {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self {
            WriteWait::Block => None,
            WriteWait::FailFast => Some(Duration::ZERO),
            WriteWait::Timeout { ms } => Some(Duration::from_millis(*ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cellarkv_data"),
            max_stores: 1024,
            map_size: 2_000_000_000,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            checkpoint_threshold: 64 * 1024 * 1024, // 64 MB
            write_wait: WriteWait::Block,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_stores == 0 {
            return Err(CellarError::Config("max_stores must be at least 1".to_string()));
        }
        if self.map_size == 0 {
            return Err(CellarError::Config("map_size must be non-zero".to_string()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(CellarError::Config(
                "EveryNEntries sync count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root of the backing container)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the maximum number of named stores
    pub fn max_stores(mut self, count: usize) -> Self {
        self.config.max_stores = count;
        self
    }

    /// Set the capacity ceiling (in bytes)
    pub fn map_size(mut self, bytes: u64) -> Self {
        self.config.map_size = bytes;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers an automatic checkpoint
    pub fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.config.checkpoint_threshold = bytes;
        self
    }

    /// Set the writer contention policy
    pub fn write_wait(mut self, wait: WriteWait) -> Self {
        self.config.write_wait = wait;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
