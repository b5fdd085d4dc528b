//! Storage Module
//!
//! The backing container: checkpoint file plus write-ahead log.
//!
//! ## Responsibilities
//! - Persist every store (catalog and records) in one sorted checkpoint file
//! - Log commits to the WAL between checkpoints
//! - Rebuild the committed snapshot on startup (checkpoint + WAL replay)
//! - Enforce the catalog and capacity limits on what it loads
//!
//! ## Container File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                           │
//! │   Magic "CLKV" (4) | Version u16 (2) | StoreCount u32 (4)   │
//! │   LastLsn u64 (8)                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Store Block (repeated StoreCount times, in name order)      │
//! │   [NameLen u32][Flags u8][RecordCount u64][Name]            │
//! │   [KeyLen u32][ValLen u32][Key][Value]   × RecordCount      │
//! │   (records in key order; duplicates repeat the key)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                            │
//! │   DataCRC u32 (4) | Magic "CLKV" (4)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod manager;
mod reader;

use std::path::PathBuf;

pub use builder::ContainerBuilder;
pub use manager::StorageManager;
pub use reader::ContainerReader;

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes identifying a CellarKV container file
pub(crate) const MAGIC: &[u8; 4] = b"CLKV";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + StoreCount (4) + LastLsn (8) = 18 bytes
pub(crate) const HEADER_SIZE: usize = 18;

/// Offset of the StoreCount field, patched by the builder on finish
pub(crate) const STORE_COUNT_OFFSET: u64 = 6;

/// Footer size: DataCRC (4) + Magic (4) = 8 bytes
pub(crate) const FOOTER_SIZE: usize = 8;

/// Store flag bit: duplicate-keys mode
pub(crate) const FLAG_DUPLICATES: u8 = 0x01;

// =============================================================================
// Container Metadata
// =============================================================================

/// Summary of a written container file
#[derive(Debug, Clone)]
pub struct ContainerMeta {
    /// Path to the container file
    pub path: PathBuf,
    /// Number of stores in the catalog
    pub store_count: u32,
    /// Number of records across all stores
    pub record_count: u64,
    /// LSN of the last commit folded into the file
    pub last_lsn: u64,
    /// File size in bytes
    pub file_size: u64,
}
