//! Binary format constants and codecs: entries, index entries, footer.

use byteorder::{LittleEndian, ReadBytesExt};
use memtable::Entry;
use std::io::{Read, Seek, SeekFrom};

use crate::{Result, TableError};

/// Magic number identifying sorted table v1 files (ASCII "STB1").
pub const TABLE_MAGIC: u32 = 0x5354_4231;

/// Size of the trailing footer-length field.
pub const FOOTER_LEN_BYTES: u64 = 4;

const TAG_TOMBSTONE: u8 = 0;
const TAG_VALUE: u8 = 1;

fn truncated(what: &str) -> TableError {
    TableError::Corrupt(format!("truncated {what}"))
}

fn read_bytes(data: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = data
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated(what))? as usize;
    if data.len() < len {
        return Err(truncated(what));
    }
    let (head, tail) = data.split_at(len);
    let out = head.to_vec();
    *data = tail;
    Ok(out)
}

fn read_str(data: &mut &[u8], what: &str) -> Result<String> {
    String::from_utf8(read_bytes(data, what)?)
        .map_err(|_| TableError::Corrupt(format!("{what} is not valid utf-8")))
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Serialized size of one entry, used by the writer to decide block cuts.
pub fn encoded_entry_len(key: &str, entry: &Entry) -> usize {
    let payload = match entry {
        Entry::Value(v) => 4 + v.len(),
        Entry::Tombstone => 0,
    };
    4 + key.len() + 1 + payload
}

/// Appends one serialized entry to a block buffer.
pub fn encode_entry(buf: &mut Vec<u8>, key: &str, entry: &Entry) {
    write_str(buf, key);
    match entry {
        Entry::Value(v) => {
            buf.push(TAG_VALUE);
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(v);
        }
        Entry::Tombstone => buf.push(TAG_TOMBSTONE),
    }
}

/// Decodes one entry, advancing `data` past it.
pub fn decode_entry(data: &mut &[u8]) -> Result<(String, Entry)> {
    let key = read_str(data, "entry key")?;
    let tag = data.read_u8().map_err(|_| truncated("entry tag"))?;
    let entry = match tag {
        TAG_VALUE => Entry::Value(read_bytes(data, "entry value")?),
        TAG_TOMBSTONE => Entry::Tombstone,
        other => {
            return Err(TableError::Corrupt(format!("unknown entry tag {other}")));
        }
    };
    Ok((key, entry))
}

/// Decodes a whole data block into its entries.
pub fn decode_block(mut data: &[u8]) -> Result<Vec<(String, Entry)>> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        entries.push(decode_entry(&mut data)?);
    }
    Ok(entries)
}

/// One index record: maps a data block's key range to its location.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// First key in the block.
    pub start_key: String,
    /// Last key in the block.
    pub end_key: String,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

impl IndexEntry {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_str(buf, &self.start_key);
        write_str(buf, &self.end_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
    }

    pub fn decode(data: &mut &[u8]) -> Result<Self> {
        let start_key = read_str(data, "index start key")?;
        let end_key = read_str(data, "index end key")?;
        let offset = data
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("index offset"))?;
        let size = data
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("index size"))?;
        Ok(IndexEntry {
            start_key,
            end_key,
            offset,
            size,
        })
    }
}

/// Table metadata, written after the index and located via the trailing
/// `footer_len` field.
#[derive(Debug, Clone)]
pub struct Footer {
    pub index_offset: u64,
    pub index_size: u64,
    pub block_count: u32,
    pub entry_count: u64,
    pub min_key: String,
    pub max_key: String,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.index_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_size.to_le_bytes());
        buf.extend_from_slice(&self.block_count.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        write_str(&mut buf, &self.min_key);
        write_str(&mut buf, &self.max_key);
        buf.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let data = &mut data;
        let index_offset = data
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("footer"))?;
        let index_size = data
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("footer"))?;
        let block_count = data
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("footer"))?;
        let entry_count = data
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("footer"))?;
        let min_key = read_str(data, "footer min key")?;
        let max_key = read_str(data, "footer max key")?;
        let magic = data
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("footer"))?;
        if magic != TABLE_MAGIC {
            return Err(TableError::Corrupt(format!(
                "bad magic: expected {TABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        if !data.is_empty() {
            return Err(TableError::Corrupt("trailing bytes after footer".to_string()));
        }
        Ok(Footer {
            index_offset,
            index_size,
            block_count,
            entry_count,
            min_key,
            max_key,
        })
    }
}

/// Reads the footer from an open table file of the given size.
///
/// Seeks to the tail for `footer_len`, then back to the footer itself. The
/// cursor position afterwards is unspecified.
pub fn read_footer<R: Read + Seek>(r: &mut R, filesize: u64) -> Result<Footer> {
    if filesize < FOOTER_LEN_BYTES {
        return Err(TableError::Corrupt("file too small for footer".to_string()));
    }
    r.seek(SeekFrom::Start(filesize - FOOTER_LEN_BYTES))?;
    let footer_len = r.read_u32::<LittleEndian>()? as u64;
    if footer_len == 0 || footer_len + FOOTER_LEN_BYTES > filesize {
        return Err(TableError::Corrupt(format!(
            "implausible footer length {footer_len} for {filesize}-byte file"
        )));
    }
    r.seek(SeekFrom::Start(filesize - FOOTER_LEN_BYTES - footer_len))?;
    let mut buf = vec![0u8; footer_len as usize];
    r.read_exact(&mut buf)?;
    Footer::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_footer() -> Footer {
        Footer {
            index_offset: 4096,
            index_size: 512,
            block_count: 3,
            entry_count: 120,
            min_key: "aardvark".to_string(),
            max_key: "zebra".to_string(),
        }
    }

    #[test]
    fn footer_roundtrip() {
        let encoded = sample_footer().encode();
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded.index_offset, 4096);
        assert_eq!(decoded.index_size, 512);
        assert_eq!(decoded.block_count, 3);
        assert_eq!(decoded.entry_count, 120);
        assert_eq!(decoded.min_key, "aardvark");
        assert_eq!(decoded.max_key, "zebra");
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = sample_footer().encode();
        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn footer_rejects_trailing_bytes() {
        let mut encoded = sample_footer().encode();
        encoded.push(0);
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            start_key: "apple".to_string(),
            end_key: "cherry".to_string(),
            offset: 128,
            size: 4096,
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf);
        let mut data = &buf[..];
        let decoded = IndexEntry::decode(&mut data).unwrap();
        assert!(data.is_empty());
        assert_eq!(decoded.start_key, "apple");
        assert_eq!(decoded.end_key, "cherry");
        assert_eq!(decoded.offset, 128);
        assert_eq!(decoded.size, 4096);
    }

    #[test]
    fn block_roundtrip_with_tombstone() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, "a", &Entry::Value(b"1".to_vec()));
        encode_entry(&mut buf, "b", &Entry::Tombstone);
        encode_entry(&mut buf, "c", &Entry::Value(Vec::new()));

        let entries = decode_block(&buf).unwrap();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), Entry::Value(b"1".to_vec())),
                ("b".to_string(), Entry::Tombstone),
                ("c".to_string(), Entry::Value(Vec::new())),
            ]
        );
    }

    #[test]
    fn entry_len_matches_encoding() {
        for (key, entry) in [
            ("k", Entry::Value(b"some value".to_vec())),
            ("longer-key", Entry::Tombstone),
        ] {
            let mut buf = Vec::new();
            encode_entry(&mut buf, key, &entry);
            assert_eq!(buf.len(), encoded_entry_len(key, &entry));
        }
    }

    #[test]
    fn decode_block_rejects_garbage_tag() {
        let mut buf = Vec::new();
        write_str(&mut buf, "k");
        buf.push(7); // neither value nor tombstone
        assert!(decode_block(&buf).is_err());
    }
}
