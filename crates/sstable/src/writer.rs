use byteorder::{LittleEndian, WriteBytesExt};
use memtable::Entry;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::Path;

use crate::format::{encode_entry, encoded_entry_len, Footer, IndexEntry};
use crate::{Result, TableError};

/// Writes an ascending entry stream to disk as an immutable sorted table.
///
/// The writer is stateless — all work happens inside the single static
/// method [`write`](TableWriter::write). The write is crash-safe: data goes
/// to a temporary file first, is fsynced, and is then atomically renamed to
/// the final path. A crash mid-write leaves only a `.tmp` file, which the
/// engine sweeps at the next open.
pub struct TableWriter {}

impl TableWriter {
    /// Streams `entries` into a new sorted table at `path`.
    ///
    /// Entries must arrive in strictly ascending key order and there must be
    /// at least one; tombstones are stored like any other entry. Blocks are
    /// cut when the next entry would push the open block past `block_size`
    /// (the first entry of a block always fits, so no block is empty).
    ///
    /// Returns the footer that was written, which callers can use for
    /// metadata without re-opening the file.
    ///
    /// # Errors
    ///
    /// [`TableError::EmptyInput`] if the stream yields nothing,
    /// [`TableError::OutOfOrder`] if it is not strictly ascending, or any
    /// I/O failure. On error the temporary file is removed and `path` is
    /// never created.
    pub fn write<I>(path: &Path, entries: I, block_size: usize) -> Result<Footer>
    where
        I: IntoIterator<Item = (String, Entry)>,
    {
        let tmp_path = path.with_extension("st.tmp");
        match Self::write_tmp(&tmp_path, entries, block_size) {
            Ok(footer) => {
                fs::rename(&tmp_path, path)?;
                Ok(footer)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    fn write_tmp<I>(tmp_path: &Path, entries: I, block_size: usize) -> Result<Footer>
    where
        I: IntoIterator<Item = (String, Entry)>,
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut w = BufWriter::new(file);

        let mut index: Vec<IndexEntry> = Vec::new();
        let mut block: Vec<u8> = Vec::new();
        // Valid only while `block` is non-empty.
        let mut block_start = String::new();
        let mut block_end = String::new();
        let mut offset = 0u64;
        let mut min_key = String::new();
        let mut prev_key: Option<String> = None;
        let mut entry_count = 0u64;

        for (key, entry) in entries {
            if let Some(prev) = &prev_key {
                if key.as_str() <= prev.as_str() {
                    return Err(TableError::OutOfOrder {
                        key,
                        prev: prev.clone(),
                    });
                }
            }

            if !block.is_empty()
                && block.len() + encoded_entry_len(&key, &entry) > block_size
            {
                index.push(IndexEntry {
                    start_key: mem::take(&mut block_start),
                    end_key: mem::take(&mut block_end),
                    offset,
                    size: block.len() as u64,
                });
                w.write_all(&block)?;
                offset += block.len() as u64;
                block.clear();
            }

            if block.is_empty() {
                block_start = key.clone();
            }
            if entry_count == 0 {
                min_key = key.clone();
            }
            encode_entry(&mut block, &key, &entry);
            block_end = key.clone();
            entry_count += 1;
            prev_key = Some(key);
        }

        if block.is_empty() {
            return Err(TableError::EmptyInput);
        }

        let max_key = block_end.clone();
        index.push(IndexEntry {
            start_key: mem::take(&mut block_start),
            end_key: mem::take(&mut block_end),
            offset,
            size: block.len() as u64,
        });
        w.write_all(&block)?;
        offset += block.len() as u64;

        let mut index_bytes = Vec::new();
        for entry in &index {
            entry.encode(&mut index_bytes);
        }
        w.write_all(&index_bytes)?;

        let footer = Footer {
            index_offset: offset,
            index_size: index_bytes.len() as u64,
            block_count: index.len() as u32,
            entry_count,
            min_key,
            max_key,
        };
        let footer_bytes = footer.encode();
        w.write_all(&footer_bytes)?;
        w.write_u32::<LittleEndian>(footer_bytes.len() as u32)?;

        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(footer)
    }
}
