//! Data directory layout: file naming and parsing.
//!
//! An engine directory contains the current write-ahead log plus one file
//! per sorted table:
//!
//! ```text
//! wal.log             current write-ahead log
//! level<L>_<seq>.st   sorted table at level L, sequence number seq
//! *.tmp               in-flight writer output, swept at open
//! ```
//!
//! Sequence numbers are unique across the whole directory and only ever
//! grow; within level 0 a larger sequence number means a newer table.

use std::path::Path;

/// File name of the current write-ahead log.
pub const WAL_FILE: &str = "wal.log";

/// Extension of in-flight table writer output.
pub const TMP_EXT: &str = "tmp";

/// File name for the sorted table at `level` with sequence number `seq`.
pub fn table_file_name(level: usize, seq: u64) -> String {
    format!("level{level}_{seq}.st")
}

/// Parses a table file name back into `(level, seq)`.
///
/// Returns `None` for anything that is not exactly `level<L>_<seq>.st`,
/// which is how directory scans skip the log, temp files, and strangers.
pub fn parse_table_file_name(name: &str) -> Option<(usize, u64)> {
    let stem = name.strip_prefix("level")?.strip_suffix(".st")?;
    let (level, seq) = stem.split_once('_')?;
    Some((level.parse().ok()?, seq.parse().ok()?))
}

/// Whether a path is leftover temporary writer output.
pub fn is_tmp_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == TMP_EXT)
}
