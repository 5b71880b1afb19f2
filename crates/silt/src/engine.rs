use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use memtable::{Entry, Memtable};
use sstable::{TableReader, TableWriter};
use wal::{Wal, WalReader, WalRecord};

use crate::config::Config;
use crate::layout;
use crate::merge::{EntrySource, MergeIter};

/// One sorted table installed in a level.
struct TableHandle {
    seq: u64,
    path: PathBuf,
    reader: TableReader,
}

/// Point-in-time engine counters, for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Approximate bytes buffered in the memtable.
    pub memtable_bytes: usize,
    /// Number of tables at each level.
    pub per_level_file_counts: Vec<usize>,
    /// Total entries (tombstones included) at each level.
    pub per_level_entry_counts: Vec<u64>,
}

/// An embedded log-structured merge-tree key-value store.
///
/// The engine is single-threaded and synchronous: every operation runs to
/// completion on the calling thread, including any flush or compaction a
/// write triggers. One engine instance owns its data directory exclusively;
/// opening two engines over the same directory is not supported.
///
/// Write path: append to the write-ahead log (durable on return), apply to
/// the memtable, flush the memtable to a level-0 sorted table once it
/// crosses its size threshold. Read path: memtable first, then level-0
/// tables newest to oldest, then deeper levels; the first tier holding the
/// key decides, and a tombstone there means "deleted" no matter what older
/// tiers say.
pub struct Engine {
    dir: PathBuf,
    config: Config,
    mem: Memtable,
    wal: Wal,
    /// `levels[0]` is ordered by sequence number (oldest first); deeper
    /// levels are ordered by key range and pairwise disjoint.
    levels: Vec<Vec<TableHandle>>,
    next_seq: u64,
}

impl Engine {
    /// Opens (or creates) an engine over `dir` and recovers its state.
    ///
    /// Recovery enumerates `level<L>_<seq>.st` files into levels, removes
    /// stray temporary files from interrupted writers, restores the
    /// sequence counter to one past the largest on disk, and replays the
    /// write-ahead log into a fresh memtable. A table that fails validation
    /// fails the open: tables are installed by atomic rename, so a bad one
    /// is corruption rather than a torn write, and silently dropping a
    /// level would resurrect deleted keys.
    pub fn open<P: AsRef<Path>>(dir: P, config: Config) -> Result<Self> {
        if config.levels_max < 2 {
            bail!("levels_max must be at least 2, got {}", config.levels_max);
        }
        if config.level0_max_files < 2 {
            bail!(
                "level0_max_files must be at least 2, got {}",
                config.level0_max_files
            );
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;

        let mut levels: Vec<Vec<TableHandle>> =
            (0..config.levels_max).map(|_| Vec::new()).collect();
        let mut max_seq = 0u64;

        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            if layout::is_tmp_file(&path) {
                warn!(file = %path.display(), "removing stray temporary file");
                fs::remove_file(&path)?;
                continue;
            }
            let name = dirent.file_name();
            let Some((level, seq)) = layout::parse_table_file_name(&name.to_string_lossy())
            else {
                continue;
            };
            if level >= config.levels_max {
                bail!(
                    "table {} is at level {level} but only {} levels are configured",
                    path.display(),
                    config.levels_max
                );
            }
            let reader = TableReader::open(&path)
                .with_context(|| format!("opening table {}", path.display()))?;
            max_seq = max_seq.max(seq);
            levels[level].push(TableHandle { seq, path, reader });
        }

        // Level 0 recency is positional: oldest first, newest last.
        levels[0].sort_by_key(|t| t.seq);
        // Deeper levels are disjoint; key order makes scans deterministic.
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.reader.min_key().cmp(b.reader.min_key()));
        }

        let wal_path = dir.join(layout::WAL_FILE);
        let mut mem = Memtable::new();
        if wal_path.exists() {
            let mut replayed = 0usize;
            let mut reader = WalReader::open(&wal_path)?;
            reader.replay(|record| {
                replayed += 1;
                match record {
                    WalRecord::Set { key, value, .. } => mem.set(key, value),
                    WalRecord::Delete { key, .. } => mem.delete(key),
                }
            })?;
            if replayed > 0 {
                info!(records = replayed, "replayed write-ahead log");
            }
        }
        let wal = Wal::open(&wal_path, config.sync_writes)?;

        let table_count: usize = levels.iter().map(Vec::len).sum();
        info!(
            dir = %dir.display(),
            tables = table_count,
            next_seq = max_seq + 1,
            "engine opened"
        );

        Ok(Self {
            dir,
            config,
            mem,
            wal,
            levels,
            next_seq: max_seq + 1,
        })
    }

    /// Stores `value` under `key`.
    ///
    /// Durable when this returns (given `sync_writes`): the operation is in
    /// the log before it is visible in memory. May trigger a flush, and
    /// through it a compaction, on this call.
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            bail!("key must be non-empty");
        }
        self.wal.append_set(key, value)?;
        self.mem.set(key.to_string(), value.to_vec());
        self.maybe_flush()
    }

    /// Deletes `key` by writing a tombstone over it.
    ///
    /// Deleting an absent key is valid and still records the tombstone:
    /// an older table below may hold the key.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if key.is_empty() {
            bail!("key must be non-empty");
        }
        self.wal.append_delete(key)?;
        self.mem.delete(key.to_string());
        self.maybe_flush()
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.mem.approx_bytes() >= self.config.mem_max_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Looks up `key`, returning its current value if live.
    ///
    /// Tiers are consulted newest first and the first one holding the key
    /// answers; a tombstone answer means the key is absent.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            bail!("key must be non-empty");
        }
        if let Some(entry) = self.mem.get(key) {
            return Ok(entry.clone().into_value());
        }
        for table in self.levels[0].iter().rev() {
            if let Some(entry) = table.reader.get(key)? {
                return Ok(entry.into_value());
            }
        }
        for level in self.levels.iter().skip(1) {
            for table in level {
                if key < table.reader.min_key() || key > table.reader.max_key() {
                    continue;
                }
                if let Some(entry) = table.reader.get(key)? {
                    return Ok(entry.into_value());
                }
            }
        }
        Ok(None)
    }

    /// Ordered scan of all live keys with `lo <= key <= hi`, inclusive.
    ///
    /// Every tier contributes a bounded sorted stream; the k-way merge keeps
    /// only the newest entry per key and tombstoned keys are dropped from
    /// the result. An inverted range yields an empty scan.
    pub fn range(&self, lo: &str, hi: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if lo > hi {
            return Ok(Vec::new());
        }

        let mut sources: Vec<EntrySource<'_>> = Vec::new();
        sources.push(Box::new(
            self.mem
                .range(lo, hi)
                .map(|(k, e)| Ok((k.clone(), e.clone()))),
        ));
        for table in self.levels[0].iter().rev() {
            sources.push(Box::new(
                table.reader.range(lo, hi).map(|r| r.map_err(Into::into)),
            ));
        }
        for level in self.levels.iter().skip(1) {
            for table in level {
                if hi < table.reader.min_key() || lo > table.reader.max_key() {
                    continue;
                }
                sources.push(Box::new(
                    table.reader.range(lo, hi).map(|r| r.map_err(Into::into)),
                ));
            }
        }

        let mut out = Vec::new();
        for item in MergeIter::new(sources)? {
            let (key, entry) = item?;
            if let Entry::Value(value) = entry {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Flushes the memtable to a new level-0 sorted table.
    ///
    /// No-op on an empty memtable. On success the write-ahead log is
    /// truncated (every logged op is now covered by the installed table)
    /// and level 0 is compacted if it has reached its file threshold. If
    /// writing the table fails nothing is installed and both the memtable
    /// and the log keep their contents.
    pub fn flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let path = self.dir.join(layout::table_file_name(0, seq));
        let entries = self.mem.iter().map(|(k, e)| (k.clone(), e.clone()));
        TableWriter::write(&path, entries, self.config.block_size_bytes)
            .with_context(|| format!("flushing memtable to {}", path.display()))?;
        let reader = TableReader::open(&path)?;

        info!(
            seq,
            entries = reader.stats().entry_count,
            bytes = self.mem.approx_bytes(),
            "flushed memtable to level 0"
        );

        self.levels[0].push(TableHandle { seq, path, reader });
        self.mem = Memtable::new();
        self.wal.truncate()?;

        if self.levels[0].len() >= self.config.level0_max_files {
            self.compact(0)?;
        }
        Ok(())
    }

    /// Merges every table at `level` and `level + 1` into a single table at
    /// `level + 1` (whole-level compaction).
    ///
    /// The newest copy of each key survives. Tombstones are carried along
    /// unless the target is the deepest level, where they have nothing left
    /// to shadow and are dropped; a merge left with no entries at all
    /// installs nothing and simply empties both levels. Input files are
    /// deleted only after the replacement is fully installed.
    fn compact(&mut self, level: usize) -> Result<()> {
        let target = level + 1;
        if target >= self.config.levels_max {
            // The deepest level has nowhere to go.
            return Ok(());
        }

        let mut sources: Vec<EntrySource<'_>> = Vec::new();
        for table in self.levels[level].iter().rev() {
            sources.push(Box::new(table.reader.iter().map(|r| r.map_err(Into::into))));
        }
        for table in self.levels[target].iter() {
            sources.push(Box::new(table.reader.iter().map(|r| r.map_err(Into::into))));
        }
        let input_files = sources.len();

        let drop_tombstones = target == self.config.levels_max - 1;
        let mut merged: Vec<(String, Entry)> = Vec::new();
        for item in MergeIter::new(sources)? {
            let (key, entry) = item?;
            if drop_tombstones && entry.is_tombstone() {
                continue;
            }
            merged.push((key, entry));
        }

        let replacement = if merged.is_empty() {
            None
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            let path = self.dir.join(layout::table_file_name(target, seq));
            let entry_count = merged.len();
            TableWriter::write(&path, merged, self.config.block_size_bytes)
                .with_context(|| format!("compacting into {}", path.display()))?;
            let reader = TableReader::open(&path)?;
            info!(
                level,
                target,
                input_files,
                entries = entry_count,
                seq,
                "compacted level"
            );
            Some(TableHandle { seq, path, reader })
        };
        if replacement.is_none() {
            info!(level, target, input_files, "compaction produced no output");
        }

        // Only now that the replacement (if any) is durable do the inputs go.
        let old_source = std::mem::take(&mut self.levels[level]);
        let old_target =
            std::mem::replace(&mut self.levels[target], replacement.into_iter().collect());
        for table in old_source.into_iter().chain(old_target) {
            fs::remove_file(&table.path)
                .with_context(|| format!("deleting compacted input {}", table.path.display()))?;
        }

        // Re-check the target level. Whole-level merges leave at most one
        // table there, so this normally recurses zero times.
        if self.levels[target].len() >= self.config.level0_max_files {
            self.compact(target)?;
        }
        Ok(())
    }

    /// Current counters: memtable bytes and per-level file/entry counts.
    pub fn stats(&self) -> Stats {
        Stats {
            memtable_bytes: self.mem.approx_bytes(),
            per_level_file_counts: self.levels.iter().map(Vec::len).collect(),
            per_level_entry_counts: self
                .levels
                .iter()
                .map(|level| level.iter().map(|t| t.reader.stats().entry_count).sum())
                .collect(),
        }
    }

    /// Syncs and releases the write-ahead log and all table handles.
    ///
    /// On-disk state is untouched; a subsequent [`Engine::open`] replays the
    /// log and rebuilds the levels. Dropping the engine without calling this
    /// is equivalent to a crash, which recovery also handles.
    pub fn close(self) -> Result<()> {
        self.wal.close()?;
        Ok(())
    }
}
