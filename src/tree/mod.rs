//! Tree Module
//!
//! In-memory ordered record set backing one named store.
//!
//! ## Responsibilities
//! - Ordered keys (lexicographic over raw bytes)
//! - Optional duplicate values per key, kept sorted and unique
//! - Record and payload accounting for `len()`, `stat()` and the map ceiling
//! - Neighbour lookups that drive cursor positioning
//!
//! ## Data Structure Choice
//! `im::OrdMap<Bytes, OrdSet<Bytes>>`:
//! - A unique-mode store simply keeps one value per set
//! - Both levels are persistent B-trees: cloning a tree is O(1) and the
//!   first write after a clone copies only the O(log n) nodes on its path,
//!   so a write transaction never pays for the size of the store
//! - Range queries over both levels give `next`/`prev`/`seek_range`

mod snapshot;

use std::ops::{
    Bound::{self, Excluded, Included, Unbounded},
    RangeBounds,
};

use bytes::Bytes;
use im::{OrdMap, OrdSet};

pub use snapshot::Snapshot;

/// A (key, value) pair borrowed from a tree
pub type RecordRef<'a> = (&'a Bytes, &'a Bytes);

/// Ordered multimap holding the records of one store
#[derive(Debug, Clone)]
pub struct Tree {
    /// Duplicate-keys mode, fixed at creation
    duplicates: bool,

    /// key → sorted set of values (exactly one value in unique mode)
    records: OrdMap<Bytes, OrdSet<Bytes>>,

    /// Number of (key, value) records
    entries: usize,

    /// Sum of key + value lengths over all records
    payload: u64,
}

/// Byte-slice bounds for `OrdMap::range` / `OrdSet::range`
#[derive(Clone, Copy)]
struct Span<'a>(Bound<&'a [u8]>, Bound<&'a [u8]>);

impl RangeBounds<[u8]> for Span<'_> {
    fn start_bound(&self) -> Bound<&[u8]> {
        self.0
    }

    fn end_bound(&self) -> Bound<&[u8]> {
        self.1
    }
}

impl Tree {
    /// Create an empty tree
    pub fn new(duplicates: bool) -> Self {
        Self {
            duplicates,
            records: OrdMap::new(),
            entries: 0,
            payload: 0,
        }
    }

    pub fn duplicates(&self) -> bool {
        self.duplicates
    }

    /// Number of records, duplicates counted individually
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Total key + value bytes
    pub fn payload(&self) -> u64 {
        self.payload
    }

    // =========================================================================
    // Point Lookups
    // =========================================================================

    /// Lowest value stored under `key`
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.records.get(key).and_then(|values| values.get_min())
    }

    /// All values under `key`, in sorted order
    pub fn values<'a>(&'a self, key: &[u8]) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.records
            .get(key)
            .into_iter()
            .flat_map(|values| values.iter())
    }

    /// Number of values under `key`
    pub fn count(&self, key: &[u8]) -> usize {
        self.records.get(key).map_or(0, |values| values.len())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.records.contains_key(key)
    }

    pub fn contains(&self, key: &[u8], value: &[u8]) -> bool {
        self.records
            .get(key)
            .map_or(false, |values| values.contains(value))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Payload growth a `put(key, value)` would cause (0 if it shrinks)
    pub fn growth(&self, key: &[u8], value: &[u8]) -> u64 {
        let incoming = (key.len() + value.len()) as u64;
        match self.records.get(key) {
            None => incoming,
            Some(values) if self.duplicates => {
                if values.contains(value) {
                    0
                } else {
                    incoming
                }
            }
            Some(values) => {
                let existing: u64 = values.iter().map(|v| (key.len() + v.len()) as u64).sum();
                incoming.saturating_sub(existing)
            }
        }
    }

    /// Insert a record
    ///
    /// Unique mode replaces the value under `key`; duplicate mode adds
    /// `value` to the key's set. Returns false only when the exact
    /// (key, value) record was already present.
    pub fn put(&mut self, key: Bytes, value: Bytes) -> bool {
        if self.contains(&key, &value) {
            return false;
        }
        let key_len = key.len() as u64;
        self.entries += 1;
        self.payload += key_len + value.len() as u64;

        if self.duplicates {
            match self.records.get_mut(&key[..]) {
                Some(values) => {
                    values.insert(value);
                }
                None => {
                    self.records.insert(key, OrdSet::unit(value));
                }
            }
        } else if let Some(old) = self.records.insert(key, OrdSet::unit(value)) {
            for v in old.iter() {
                self.entries -= 1;
                self.payload -= key_len + v.len() as u64;
            }
        }
        true
    }

    /// Remove `key` and all of its values; returns the number of records removed
    pub fn delete_key(&mut self, key: &[u8]) -> usize {
        match self.records.remove(key) {
            Some(values) => {
                let removed = values.len();
                self.entries -= removed;
                self.payload -= values
                    .iter()
                    .map(|v| (key.len() + v.len()) as u64)
                    .sum::<u64>();
                removed
            }
            None => 0,
        }
    }

    /// Remove a single (key, value) record
    pub fn delete_value(&mut self, key: &[u8], value: &[u8]) -> bool {
        let Some(values) = self.records.get_mut(key) else {
            return false;
        };
        if values.remove(value).is_none() {
            return false;
        }
        let emptied = values.is_empty();
        if emptied {
            self.records.remove(key);
        }
        self.entries -= 1;
        self.payload -= (key.len() + value.len()) as u64;
        true
    }

    // =========================================================================
    // Ordered Navigation
    // =========================================================================

    /// Lowest record
    pub fn first(&self) -> Option<RecordRef<'_>> {
        let (key, values) = self.records.get_min()?;
        Some((key, values.get_min()?))
    }

    /// Highest record
    pub fn last(&self) -> Option<RecordRef<'_>> {
        let (key, values) = self.records.get_max()?;
        Some((key, values.get_max()?))
    }

    /// First record of `key`, if the key exists
    pub fn first_dup(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.first_in(Span(Included(key), Included(key)))
    }

    /// First record whose key is `>= key`
    pub fn ceiling(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.first_in(Span(Included(key), Unbounded))
    }

    /// First record whose key is `> key`
    pub fn after_key(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.first_in(Span(Excluded(key), Unbounded))
    }

    /// Record immediately after (key, value), duplicates first
    pub fn successor(&self, key: &[u8], value: &[u8]) -> Option<RecordRef<'_>> {
        let exact = Span(Included(key), Included(key));
        if let Some((k, values)) = self.records.range(exact).next() {
            if let Some(v) = values.range(Span(Excluded(value), Unbounded)).next() {
                return Some((k, v));
            }
        }
        self.after_key(key)
    }

    /// Record immediately before (key, value), duplicates first
    pub fn predecessor(&self, key: &[u8], value: &[u8]) -> Option<RecordRef<'_>> {
        let exact = Span(Included(key), Included(key));
        if let Some((k, values)) = self.records.range(exact).next() {
            if let Some(v) = values.range(Span(Unbounded, Excluded(value))).next_back() {
                return Some((k, v));
            }
        }
        let (k, values) = self
            .records
            .range(Span(Unbounded, Excluded(key)))
            .next_back()?;
        Some((k, values.get_max()?))
    }

    /// Iterate every record in (key, value) order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = RecordRef<'_>> + '_ {
        self.records
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key, value)))
    }

    /// Keys `<= upper`, highest first
    pub fn keys_down_from<'a>(&'a self, upper: &[u8]) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.records
            .range(Span(Unbounded, Included(upper)))
            .rev()
            .map(|(key, _)| key)
    }

    fn first_in(&self, span: Span<'_>) -> Option<RecordRef<'_>> {
        let (key, values) = self.records.range(span).next()?;
        Some((key, values.get_min()?))
    }
}
