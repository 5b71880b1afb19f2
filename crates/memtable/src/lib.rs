//! # Memtable
//!
//! An in-memory, sorted, mutable write buffer for the Silt storage engine.
//!
//! The memtable is the first point of contact for every write operation. It
//! buffers recent `SET` and `DELETE` operations in a sorted structure
//! (`BTreeMap`) before they are flushed to immutable on-disk sorted tables.
//!
//! ## Key properties
//! - **Sorted order**: entries are always in ascending key order (required for
//!   the sorted table flush and for range scans).
//! - **Tombstone support**: deletes are recorded as [`Entry::Tombstone`]
//!   markers that shadow older values in deeper tiers.
//! - **Approximate size tracking**: tracks the byte size of keys + values so
//!   the engine can decide when to flush.
//!
//! ## Example
//! ```rust
//! use memtable::{Entry, Memtable};
//!
//! let mut m = Memtable::new();
//! m.set("hello".to_string(), b"world".to_vec());
//! assert_eq!(m.get("hello"), Some(&Entry::Value(b"world".to_vec())));
//!
//! m.delete("hello".to_string());
//! assert_eq!(m.get("hello"), Some(&Entry::Tombstone));
//! ```

use std::collections::BTreeMap;
use std::ops::Bound;

/// A single stored value: either a live payload or a deletion marker.
///
/// Tombstones are retained in the memtable and flushed to sorted tables so
/// that older values in deeper levels are correctly shadowed during reads.
/// They are physically discarded only when compaction merges into the
/// deepest level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A live value. The engine treats the payload as opaque bytes.
    Value(Vec<u8>),
    /// A deletion marker.
    Tombstone,
}

impl Entry {
    /// Returns the payload bytes for a live value, `None` for a tombstone.
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    /// Consumes the entry, returning the payload for a live value.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    /// Returns `true` if this entry is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstone)
    }

    /// Byte contribution of the payload toward the memtable size estimate.
    fn payload_bytes(&self) -> usize {
        match self {
            Entry::Value(v) => v.len(),
            Entry::Tombstone => 0,
        }
    }
}

/// An ordered, in-memory write buffer backed by a `BTreeMap`.
///
/// The memtable tracks an approximate byte size (keys + values) so the engine
/// can decide when to flush to a sorted table. Overwriting a key subtracts the
/// replaced entry's payload contribution before adding the new one, so the
/// estimate follows live data rather than write volume.
#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<String, Entry>,
    approx_bytes: usize,
}

impl Memtable {
    /// Creates a new, empty memtable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, replacing any previous value or tombstone.
    pub fn set(&mut self, key: String, value: Vec<u8>) {
        self.insert(key, Entry::Value(value));
    }

    /// Records a tombstone (delete marker) for the given key.
    ///
    /// A tombstone shadows any older value both in the memtable and in sorted
    /// tables during reads. Deleting a key that was never written here is
    /// valid: the marker must still propagate to disk in case an older level
    /// holds the key.
    pub fn delete(&mut self, key: String) {
        self.insert(key, Entry::Tombstone);
    }

    fn insert(&mut self, key: String, entry: Entry) {
        match self.map.get(&key) {
            Some(old) => {
                // Key bytes stay counted; only the payload is replaced.
                self.approx_bytes = self.approx_bytes.saturating_sub(old.payload_bytes());
            }
            None => {
                self.approx_bytes = self.approx_bytes.saturating_add(key.len());
            }
        }
        self.approx_bytes = self.approx_bytes.saturating_add(entry.payload_bytes());
        self.map.insert(key, entry);
    }

    /// Looks up a key, returning the stored entry if present.
    ///
    /// A `Some(&Entry::Tombstone)` result means the key was deleted here and
    /// older tiers must not be consulted; `None` means this buffer holds no
    /// opinion on the key at all.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    /// Returns an ascending iterator over entries with `lo <= key <= hi`.
    ///
    /// Tombstones are included. An inverted range (`lo > hi`) yields nothing.
    pub fn range<'a>(&'a self, lo: &str, hi: &str) -> impl Iterator<Item = (&'a String, &'a Entry)> {
        let bounded = if lo <= hi {
            Some(
                self.map
                    .range::<str, _>((Bound::Included(lo), Bound::Included(hi))),
            )
        } else {
            None
        };
        bounded.into_iter().flatten()
    }

    /// Returns an iterator over all entries in **ascending key order**.
    ///
    /// This includes tombstones. The ordering guarantee is provided by the
    /// underlying `BTreeMap` and is required for a correct sorted table flush.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.map.iter()
    }

    /// Returns the number of entries (including tombstones).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the memtable contains zero entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the approximate byte size of all keys and values stored.
    ///
    /// This is what the engine compares against its flush threshold. The
    /// estimate covers key bytes + payload bytes but not `BTreeMap` node
    /// overhead.
    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }
}
