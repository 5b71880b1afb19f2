//! # Sorted tables
//!
//! Immutable, on-disk storage files for the Silt storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! engine flushes it to disk as a sorted table. Tables are **write-once,
//! read-many** — once created they are never modified, only replaced by
//! compaction and then deleted.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (each a sorted run of entries)              │
//! │                                                         │
//! │ entry: key_len(u32) | key | tag(u8) | [val_len(u32)|val]│
//! │ tag = 1 live value, 0 tombstone                         │
//! │                                                         │
//! │ ... blocks sized to a configurable target ...           │
//! ├─────────────────────────────────────────────────────────┤
//! │ INDEX (one entry per block)                             │
//! │                                                         │
//! │ start_key_len(u32) | start_key | end_key_len(u32)       │
//! │ | end_key | offset(u64) | size(u64)                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ FOOTER (variable length)                                │
//! │                                                         │
//! │ index_offset(u64) | index_size(u64) | block_count(u32)  │
//! │ | entry_count(u64) | min_key_len(u32) | min_key         │
//! │ | max_key_len(u32) | max_key | magic(u32 = "STB1")      │
//! ├─────────────────────────────────────────────────────────┤
//! │ footer_len (u32, always the last 4 bytes)               │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. A reader locates the footer by reading
//! `footer_len` from the file tail, then walking backwards.
//!
//! Invariants every table upholds: entries within a block are strictly
//! ascending, block `i`'s end key is strictly below block `i+1`'s start key,
//! and the footer's min/max agree with the first and last block.

use std::io;

use thiserror::Error;

mod format;
mod reader;
mod writer;

pub use format::{Footer, IndexEntry, TABLE_MAGIC};
pub use reader::{TableIter, TableRange, TableReader};
pub use writer::TableWriter;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt table: {0}")]
    Corrupt(String),
    #[error("table writer given no entries")]
    EmptyInput,
    #[error("table entries out of order: {key:?} after {prev:?}")]
    OutOfOrder { key: String, prev: String },
}

pub type Result<T> = std::result::Result<T, TableError>;
