//! # Silt
//!
//! An embedded, single-process, ordered key-value storage engine built on
//! the log-structured merge-tree design.
//!
//! Writes land in a write-ahead log and an in-memory sorted buffer; full
//! buffers flush to immutable sorted table files at level 0; crowded levels
//! merge downward through compaction. Reads consult the tiers newest-first,
//! so the most recent write (or delete) for a key always wins.
//!
//! ## Example
//! ```no_run
//! use silt::{Config, Engine};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut db = Engine::open("./data", Config::default())?;
//! db.set("user:1", b"alice")?;
//! assert_eq!(db.get("user:1")?, Some(b"alice".to_vec()));
//! db.delete("user:1")?;
//! assert_eq!(db.get("user:1")?, None);
//! db.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod layout;
mod merge;

pub use config::Config;
pub use engine::{Engine, Stats};
pub use layout::{parse_table_file_name, table_file_name, WAL_FILE};
