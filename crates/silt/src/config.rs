//! Tunable parameters for the storage engine.

/// Engine configuration.
///
/// The defaults match a small embedded deployment; tests shrink the
/// thresholds to force flushes and compactions with little data.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memtable size (key + value bytes) that triggers a flush to level 0.
    pub mem_max_bytes: usize,
    /// Number of level-0 tables that triggers compaction into level 1.
    pub level0_max_files: usize,
    /// Number of levels. Tombstones are dropped only when compaction merges
    /// into level `levels_max - 1`.
    pub levels_max: usize,
    /// Target size of one sorted table data block.
    pub block_size_bytes: usize,
    /// Whether every log append fsyncs before returning. Disabling trades
    /// crash durability of the most recent writes for throughput.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mem_max_bytes: 4 * 1024 * 1024, // 4 MiB
            level0_max_files: 4,
            levels_max: 7,
            block_size_bytes: 4096,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Set the memtable flush threshold.
    pub fn with_mem_max_bytes(mut self, bytes: usize) -> Self {
        self.mem_max_bytes = bytes;
        self
    }

    /// Set the level-0 compaction trigger.
    pub fn with_level0_max_files(mut self, files: usize) -> Self {
        self.level0_max_files = files;
        self
    }

    /// Set the number of levels.
    pub fn with_levels_max(mut self, levels: usize) -> Self {
        self.levels_max = levels;
        self
    }

    /// Set the sorted table block size target.
    pub fn with_block_size_bytes(mut self, bytes: usize) -> Self {
        self.block_size_bytes = bytes;
        self
    }

    /// Enable or disable fsync on every log append.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}
