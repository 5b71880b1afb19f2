use memtable::Entry;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{decode_block, read_footer, Footer, IndexEntry};
use crate::{Result, TableError};

/// Read handle for one sorted table file.
///
/// On [`open`](TableReader::open) the footer and the whole index are loaded
/// and cached for the reader's lifetime; data blocks are fetched on demand.
/// The data file itself is **not** kept open between operations — each block
/// read opens the file, seeks, reads one block, and drops the handle. This
/// keeps ownership simple and means compaction can delete input files
/// without fighting long-lived descriptors.
pub struct TableReader {
    /// Path to the `.st` file on disk.
    path: PathBuf,
    footer: Footer,
    /// One entry per data block, ascending and non-overlapping.
    index: Vec<IndexEntry>,
}

impl TableReader {
    /// Opens a sorted table and loads its footer and index.
    ///
    /// # Validation
    ///
    /// The trailing footer-length must fit the file, the footer magic must
    /// match, the index must sit inside the file and agree with the footer's
    /// block count, and the footer min/max must agree with the first and
    /// last index entries. Any mismatch fails the open: tables install via
    /// atomic rename, so a malformed table is corruption, not a torn write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path)?;
        let filesize = f.metadata()?.len();

        let footer = read_footer(&mut f, filesize)?;

        let index_end = footer
            .index_offset
            .checked_add(footer.index_size)
            .ok_or_else(|| TableError::Corrupt("index extent overflows".to_string()))?;
        if index_end > filesize {
            return Err(TableError::Corrupt(
                "index extends past end of file".to_string(),
            ));
        }

        f.seek(SeekFrom::Start(footer.index_offset))?;
        let mut buf = vec![0u8; footer.index_size as usize];
        f.read_exact(&mut buf)?;

        let mut data = &buf[..];
        let mut index = Vec::with_capacity(footer.block_count as usize);
        while !data.is_empty() {
            index.push(IndexEntry::decode(&mut data)?);
        }

        if index.len() != footer.block_count as usize {
            return Err(TableError::Corrupt(format!(
                "index holds {} blocks, footer claims {}",
                index.len(),
                footer.block_count
            )));
        }
        match (index.first(), index.last()) {
            (Some(first), Some(last))
                if first.start_key == footer.min_key && last.end_key == footer.max_key => {}
            _ => {
                return Err(TableError::Corrupt(
                    "footer key range disagrees with index".to_string(),
                ));
            }
        }

        Ok(Self {
            path,
            footer,
            index,
        })
    }

    /// Point lookup for a single key.
    ///
    /// Returns `Ok(Some(entry))` if this table holds the key. The entry may
    /// be a tombstone, which is **not** suppressed here (shadowing is the
    /// engine's call, not the table's). Returns `Ok(None)` if the key is
    /// outside the table's range, falls between two blocks, or is absent
    /// from its candidate block.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        if key < self.footer.min_key.as_str() || key > self.footer.max_key.as_str() {
            return Ok(None);
        }
        // Last block whose start key is at or below the target.
        let pos = self.index.partition_point(|b| b.start_key.as_str() <= key);
        if pos == 0 {
            return Ok(None);
        }
        let meta = &self.index[pos - 1];
        if key > meta.end_key.as_str() {
            // Key falls in the gap between this block and the next.
            return Ok(None);
        }

        let mut entries = self.read_block(meta)?;
        match entries.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(i) => Ok(Some(entries.swap_remove(i).1)),
            Err(_) => Ok(None),
        }
    }

    /// Ascending scan over entries with `lo <= key <= hi`, tombstones
    /// included. Blocks outside the bounds are never read.
    pub fn range(&self, lo: &str, hi: &str) -> TableRange<'_> {
        let next_block = if lo <= hi {
            // First block that could hold a key at or above `lo`.
            self.index.partition_point(|b| b.end_key.as_str() < lo)
        } else {
            self.index.len()
        };
        TableRange {
            reader: self,
            lo: lo.to_string(),
            hi: hi.to_string(),
            next_block,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Full ascending iteration over every entry in the table.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            reader: self,
            next_block: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// The cached footer: entry/block counts and the key range.
    pub fn stats(&self) -> &Footer {
        &self.footer
    }

    /// Smallest key in the table.
    pub fn min_key(&self) -> &str {
        &self.footer.min_key
    }

    /// Largest key in the table.
    pub fn max_key(&self) -> &str {
        &self.footer.max_key
    }

    fn read_block(&self, meta: &IndexEntry) -> Result<Vec<(String, Entry)>> {
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(meta.offset))?;
        let mut buf = vec![0u8; meta.size as usize];
        f.read_exact(&mut buf)?;
        decode_block(&buf)
    }
}

/// Iterator over a bounded key range of one table. See [`TableReader::range`].
pub struct TableRange<'a> {
    reader: &'a TableReader,
    lo: String,
    hi: String,
    next_block: usize,
    current: std::vec::IntoIter<(String, Entry)>,
    failed: bool,
}

impl Iterator for TableRange<'_> {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(pair) = self.current.next() {
                return Some(Ok(pair));
            }
            let meta = self.reader.index.get(self.next_block)?;
            if meta.start_key.as_str() > self.hi.as_str() {
                return None;
            }
            self.next_block += 1;
            match self.reader.read_block(meta) {
                Ok(mut entries) => {
                    entries.retain(|(k, _)| {
                        k.as_str() >= self.lo.as_str() && k.as_str() <= self.hi.as_str()
                    });
                    self.current = entries.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterator over every entry of one table. See [`TableReader::iter`].
pub struct TableIter<'a> {
    reader: &'a TableReader,
    next_block: usize,
    current: std::vec::IntoIter<(String, Entry)>,
    failed: bool,
}

impl Iterator for TableIter<'_> {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(pair) = self.current.next() {
                return Some(Ok(pair));
            }
            let meta = self.reader.index.get(self.next_block)?;
            self.next_block += 1;
            match self.reader.read_block(meta) {
                Ok(entries) => self.current = entries.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TableWriter;
    use tempfile::tempdir;

    fn write_table(path: &Path, pairs: &[(&str, Option<&[u8]>)], block_size: usize) {
        let input: Vec<(String, Entry)> = pairs
            .iter()
            .map(|(k, v)| {
                let entry = match v {
                    Some(v) => Entry::Value(v.to_vec()),
                    None => Entry::Tombstone,
                };
                (k.to_string(), entry)
            })
            .collect();
        TableWriter::write(path, input, block_size).unwrap();
    }

    // -------------------- Open & point lookups --------------------

    #[test]
    fn open_and_get_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.st");
        write_table(
            &path,
            &[
                ("a", Some(b"apple")),
                ("b", Some(b"banana")),
                ("c", Some(b"")),
                ("d", None),
            ],
            4096,
        );

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(
            reader.get("a").unwrap(),
            Some(Entry::Value(b"apple".to_vec()))
        );
        assert_eq!(
            reader.get("b").unwrap(),
            Some(Entry::Value(b"banana".to_vec()))
        );
        assert_eq!(reader.get("c").unwrap(), Some(Entry::Value(Vec::new())));
        assert_eq!(reader.get("d").unwrap(), Some(Entry::Tombstone));
        assert_eq!(reader.get("nope").unwrap(), None);
    }

    #[test]
    fn get_outside_key_range_early_outs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.st");
        write_table(&path, &[("m", Some(b"1")), ("n", Some(b"2"))], 4096);

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.get("a").unwrap(), None);
        assert_eq!(reader.get("z").unwrap(), None);
    }

    #[test]
    fn get_across_block_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.st");
        // ~11 bytes per entry; 24-byte blocks hold two entries each.
        write_table(
            &path,
            &[
                ("a", Some(b"1")),
                ("b", Some(b"2")),
                ("c", Some(b"3")),
                ("d", Some(b"4")),
                ("e", Some(b"5")),
            ],
            24,
        );

        let reader = TableReader::open(&path).unwrap();
        assert!(reader.stats().block_count > 1);
        for key in ["a", "b", "c", "d", "e"] {
            assert!(reader.get(key).unwrap().is_some(), "missing {key}");
        }
    }

    #[test]
    fn get_key_in_gap_between_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gap.st");
        // Blocks split as [a, b] and [d, e]; "c" sits in the gap.
        write_table(
            &path,
            &[
                ("a", Some(b"1")),
                ("b", Some(b"2")),
                ("d", Some(b"4")),
                ("e", Some(b"5")),
            ],
            24,
        );

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.stats().block_count, 2);
        assert_eq!(reader.get("c").unwrap(), None);
    }

    // -------------------- Range scans --------------------

    #[test]
    fn range_spans_blocks_inclusively() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("range.st");
        write_table(
            &path,
            &[
                ("a", Some(b"1")),
                ("b", Some(b"2")),
                ("c", Some(b"3")),
                ("d", Some(b"4")),
                ("e", Some(b"5")),
            ],
            24,
        );

        let reader = TableReader::open(&path).unwrap();
        let keys: Vec<String> = reader
            .range("b", "d")
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["b", "c", "d"]);
    }

    #[test]
    fn range_full_and_empty_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("range.st");
        write_table(&path, &[("b", Some(b"1")), ("c", Some(b"2"))], 4096);

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.range("a", "z").count(), 2);
        assert_eq!(reader.range("x", "z").count(), 0);
        assert_eq!(reader.range("a", "a").count(), 0);
        assert_eq!(reader.range("z", "a").count(), 0); // inverted
    }

    #[test]
    fn range_single_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("range.st");
        write_table(&path, &[("b", Some(b"1")), ("c", Some(b"2"))], 4096);

        let reader = TableReader::open(&path).unwrap();
        let hits: Vec<String> = reader.range("c", "c").map(|r| r.unwrap().0).collect();
        assert_eq!(hits, vec!["c"]);
    }

    #[test]
    fn range_yields_tombstones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("range.st");
        write_table(&path, &[("a", Some(b"1")), ("b", None)], 4096);

        let reader = TableReader::open(&path).unwrap();
        let entries: Vec<(String, Entry)> =
            reader.range("a", "z").map(|r| r.unwrap()).collect();
        assert_eq!(entries[1], ("b".to_string(), Entry::Tombstone));
    }

    // -------------------- Full iteration --------------------

    #[test]
    fn iter_yields_everything_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iter.st");
        let pairs: Vec<(String, Entry)> = (0..100u32)
            .map(|i| (format!("k{i:03}"), Entry::Value(b"v".to_vec())))
            .collect();
        TableWriter::write(&path, pairs.clone(), 64).unwrap();

        let reader = TableReader::open(&path).unwrap();
        let read_back: Vec<(String, Entry)> = reader.iter().map(|r| r.unwrap()).collect();
        assert_eq!(read_back, pairs);
    }

    #[test]
    fn stats_reflect_footer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.st");
        write_table(&path, &[("a", Some(b"1")), ("z", None)], 4096);

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.stats().entry_count, 2);
        assert_eq!(reader.min_key(), "a");
        assert_eq!(reader.max_key(), "z");
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn open_file_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.st");
        std::fs::write(&path, b"sh").unwrap();
        assert!(TableReader::open(&path).is_err());
    }

    #[test]
    fn open_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.st");
        write_table(&path, &[("a", Some(b"1"))], 4096);

        // Corrupt the magic, which sits just before the footer length.
        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 5] ^= 0xFF;
        let bad = dir.path().join("bad.st");
        std::fs::write(&bad, &bytes).unwrap();

        assert!(TableReader::open(&bad).is_err());
    }

    #[test]
    fn open_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.st");
        write_table(&path, &[("a", Some(b"1")), ("b", Some(b"2"))], 4096);

        let bytes = std::fs::read(&path).unwrap();
        let cut = dir.path().join("cut.st");
        std::fs::write(&cut, &bytes[..bytes.len() / 2]).unwrap();

        assert!(TableReader::open(&cut).is_err());
    }

    #[test]
    fn open_nonexistent_file() {
        assert!(TableReader::open("/tmp/no_such_table_silt.st").is_err());
    }
}
