//! Time-ordered key generation for `Cursor::post`
//!
//! A key is 32 lowercase hex characters:
//!
//! ```text
//! ┌──────────────────────┬──────────────┬──────────────┐
//! │ wall-clock µs (16)   │ sequence (8) │ node tag (8) │
//! └──────────────────────┴──────────────┴──────────────┘
//! ```
//!
//! Keys from one generator are strictly increasing in byte order. Calls
//! inside the same microsecond, or after the clock steps backwards, reuse
//! the last timestamp and bump the sequence instead. The node tag separates
//! generators in different processes writing at the same instant.
//!
//! A fresh generator only knows the clock. `observe` raises its floor to a
//! key already stored, so a restarted environment keeps appending after its
//! earlier posts even if the wall clock went backwards in between.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;

/// Length of a generated key in bytes
pub const KEY_LEN: usize = 32;

/// Highest possible generated key
pub const MAX_KEY: &[u8; KEY_LEN] = b"ffffffffffffffffffffffffffffffff";

/// Generator of strictly increasing, time-ordered keys
pub struct KeyGenerator {
    state: Mutex<ClockState>,
    node: u32,
}

#[derive(Debug, Default)]
struct ClockState {
    /// Timestamp (µs) of the last key handed out
    micros: u64,
    /// Tie-breaker within `micros`
    sequence: u32,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::with_node(process_tag())
    }

    /// Generator with a fixed node tag
    pub fn with_node(node: u32) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            node,
        }
    }

    /// Produce the next key
    pub fn next_key(&self) -> Bytes {
        let now = now_micros();
        let mut state = self.state.lock();

        if now > state.micros {
            state.micros = now;
            state.sequence = 0;
        } else if state.sequence == u32::MAX {
            state.micros = state.micros.saturating_add(1);
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }

        Bytes::from(format!(
            "{:016x}{:08x}{:08x}",
            state.micros, state.sequence, self.node
        ))
    }

    /// Never hand out a key at or below `key`
    ///
    /// Returns false, and changes nothing, if `key` is not a generated key.
    pub fn observe(&self, key: &[u8]) -> bool {
        let Some((micros, sequence)) = parse_key(key) else {
            return false;
        };
        let mut state = self.state.lock();
        if (micros, sequence) > (state.micros, state.sequence) {
            state.micros = micros;
            state.sequence = sequence;
        }
        true
    }
}

/// Timestamp and sequence of a generated key
fn parse_key(key: &[u8]) -> Option<(u64, u32)> {
    let lower_hex = |b: &u8| matches!(b, b'0'..=b'9' | b'a'..=b'f');
    if key.len() != KEY_LEN || !key.iter().all(lower_hex) {
        return None;
    }
    let text = std::str::from_utf8(key).ok()?;
    let micros = u64::from_str_radix(&text[..16], 16).ok()?;
    let sequence = u32::from_str_radix(&text[16..24], 16).ok()?;
    Some((micros, sequence))
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Per-process tag: CRC of the pid and the start instant
fn process_tag() -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    hasher.update(&nanos.to_le_bytes());
    hasher.finalize()
}
