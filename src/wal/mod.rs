//! Write-Ahead Log (WAL) Module
//!
//! Durability for committed write transactions between checkpoints.
//!
//! Every commit appends exactly one entry, holding the transaction's
//! effective operations in order, before the new snapshot is published.
//! On startup the entries newer than the container's last LSN are replayed;
//! a checkpoint truncates the log.
//!
//! ## Entry Frame
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────────────────────┐
//! │ LSN u64  │ CRC u32  │ Len u32  │ bincode { timestamp, ops[] }    │
//! └──────────┴──────────┴──────────┴─────────────────────────────────┘
//!   CRC = crc32(LSN ‖ Len ‖ payload)
//! ```
//!
//! Frames are laid back to back. A torn or mismatching frame ends the valid
//! log; recovery cuts the file there.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{Operation, WalEntry, HEADER_SIZE};
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
