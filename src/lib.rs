//! # CellarKV
//!
//! An embedded, multi-store key-value environment with:
//! - Named, independently ordered stores inside one on-disk container
//! - Optional duplicate keys (sorted values per key)
//! - Positioned cursors for ordered traversal, lookup and mutation
//! - Single-writer/multi-reader transactions with snapshot isolation
//! - Write-Ahead Logging (WAL) and checkpointing for durability
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Environment                           │
//! │             (store registry, start / stop)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Store ─▶ Cursor ─▶ Transaction
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          Committed Snapshot  (Arc, copy-on-write)            │
//! │     readers pin a version · one writer builds the next       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ commit
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  Container  │
//!   │  (Append)   │ ───────▶ │ (Checkpoint)│
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod tree;
pub mod storage;
pub mod keys;
pub mod txn;
pub mod cursor;
pub mod store;
pub mod env;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CellarError, Result};
pub use config::{Config, WalSyncStrategy, WriteWait};
pub use env::{EnvStat, Environment, StoreStat};
pub use store::Store;
pub use cursor::Cursor;
pub use txn::Transaction;
pub use registry::StoreRegistry;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CellarKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
