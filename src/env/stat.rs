//! Environment statistics.

use bytes::Bytes;

use crate::config::Config;
use crate::tree::Snapshot;

/// Aggregate counts and sizes for an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvStat {
    /// Number of named stores
    pub stores: usize,
    /// Records across all stores (duplicates counted individually)
    pub entries: usize,
    /// Key + value bytes across all stores
    pub payload_bytes: u64,
    /// Configured capacity ceiling
    pub map_size: u64,
    /// LSN of the last commit
    pub last_lsn: u64,
    /// Read transactions currently open
    pub active_readers: usize,
    /// Size of the WAL since the last checkpoint
    pub wal_bytes: u64,
    /// Per-store breakdown, in name order
    pub per_store: Vec<StoreStat>,
}

/// Counts and sizes for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStat {
    pub name: Bytes,
    pub duplicates: bool,
    /// Records (duplicates counted individually)
    pub entries: usize,
    /// Distinct keys
    pub keys: usize,
    pub payload_bytes: u64,
}

impl EnvStat {
    pub(crate) fn collect(
        snapshot: &Snapshot,
        config: &Config,
        active_readers: usize,
        wal_bytes: u64,
    ) -> Self {
        let per_store: Vec<StoreStat> = snapshot
            .stores()
            .map(|(name, tree)| StoreStat {
                name: name.clone(),
                duplicates: tree.duplicates(),
                entries: tree.len(),
                keys: tree.key_count(),
                payload_bytes: tree.payload(),
            })
            .collect();

        Self {
            stores: per_store.len(),
            entries: per_store.iter().map(|s| s.entries).sum(),
            payload_bytes: per_store.iter().map(|s| s.payload_bytes).sum(),
            map_size: config.map_size,
            last_lsn: snapshot.lsn(),
            active_readers,
            wal_bytes,
            per_store,
        }
    }

    /// Fraction of the capacity ceiling in use
    pub fn fill_ratio(&self) -> f64 {
        self.payload_bytes as f64 / self.map_size as f64
    }
}
