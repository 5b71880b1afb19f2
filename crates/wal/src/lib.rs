//! # Write-ahead log
//!
//! Every mutation the engine accepts is appended here and synced to stable
//! storage **before** it is applied to the memtable. On restart the log is
//! replayed into a fresh memtable, which makes a crash at any point
//! recoverable: either a record made it to disk (and replays) or the write
//! never returned to the caller.
//!
//! ## Record framing
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body]
//! body = ts(u64 LE) | op(u8: 0=set, 1=delete) | key_len(u32 LE) | key
//!        | val_len(u32 LE) | value          (set only)
//! ```
//!
//! `record_len` counts the crc field plus the body. The CRC covers the body
//! only, so a torn tail write is detected either by a short read or by a
//! checksum mismatch. Replay treats the first such record as the end of the
//! log: a crash mid-append is the expected way for a log to end, not an
//! error.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

/// Upper bound on a single record's framed length. A length prefix beyond
/// this is treated as corruption rather than an allocation request.
const MAX_RECORD_LEN: u32 = 1 << 28; // 256 MiB

/// A single logical operation recorded in the log.
///
/// `ts` is an informational unix-millis timestamp; recovery ordering comes
/// from record position in the file, never from the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Set {
        key: String,
        value: Vec<u8>,
        ts: u64,
    },
    Delete {
        key: String,
        ts: u64,
    },
}

impl WalRecord {
    /// The key this record mutates.
    pub fn key(&self) -> &str {
        match self {
            WalRecord::Set { key, .. } | WalRecord::Delete { key, .. } => key,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

const OP_SET: u8 = 0;
const OP_DELETE: u8 = 1;

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Append handle for the write-ahead log.
///
/// With `sync` enabled (the engine's default) every append returns only after
/// `sync_all`, so a record that was acknowledged survives power loss. The
/// no-sync mode exists for benchmarks and bulk loads that accept the weaker
/// guarantee.
pub struct Wal {
    file: File,
    path: PathBuf,
    sync: bool,
}

impl Wal {
    /// Opens the log at `path` for appending, creating it if absent.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path, sync })
    }

    /// Appends a `SET` record. Durable on return when sync is enabled.
    pub fn append_set(&mut self, key: &str, value: &[u8]) -> Result<(), WalError> {
        self.append(&WalRecord::Set {
            key: key.to_string(),
            value: value.to_vec(),
            ts: unix_millis(),
        })
    }

    /// Appends a `DELETE` record. Durable on return when sync is enabled.
    pub fn append_delete(&mut self, key: &str) -> Result<(), WalError> {
        self.append(&WalRecord::Delete {
            key: key.to_string(),
            ts: unix_millis(),
        })
    }

    fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let mut body = Vec::new();
        match record {
            WalRecord::Set { key, value, ts } => {
                body.write_u64::<LittleEndian>(*ts)?;
                body.write_u8(OP_SET)?;
                body.write_u32::<LittleEndian>(key.len() as u32)?;
                body.extend_from_slice(key.as_bytes());
                body.write_u32::<LittleEndian>(value.len() as u32)?;
                body.extend_from_slice(value);
            }
            WalRecord::Delete { key, ts } => {
                body.write_u64::<LittleEndian>(*ts)?;
                body.write_u8(OP_DELETE)?;
                body.write_u32::<LittleEndian>(key.len() as u32)?;
                body.extend_from_slice(key.as_bytes());
            }
        }

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        // record_len counts the crc field plus the body.
        self.file
            .write_u32::<LittleEndian>(body.len() as u32 + 4)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(&body)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Discards the log: closes the handle, removes the file, opens a fresh
    /// empty one at the same path.
    ///
    /// Called after a successful memtable flush, once every record in the log
    /// is covered by an installed sorted table. A crash between the table
    /// install and this call leaves records that replay into state the table
    /// already holds, which the engine's recency rules make harmless.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        fs::remove_file(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = file;
        Ok(())
    }

    /// Syncs and releases the log handle.
    pub fn close(self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sequential reader used during recovery.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays records in append order, invoking `apply` for each.
    ///
    /// The first record that is truncated, fails its checksum, or does not
    /// parse ends the replay: a diagnostic is logged and the clean prefix
    /// stands. Replay is a pure function of that prefix, so running it twice
    /// over the same file produces the same sequence. Genuine I/O failures
    /// (not end-of-data) are returned as errors.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        loop {
            let record_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };
            if record_len < 4 || record_len > MAX_RECORD_LEN {
                warn!(record_len, "log ends in record with implausible length, truncating replay");
                return Ok(());
            }

            let mut framed = vec![0u8; record_len as usize];
            match self.rdr.read_exact(&mut framed) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("log ends in torn record, truncating replay");
                    return Ok(());
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            let crc = u32::from_le_bytes([framed[0], framed[1], framed[2], framed[3]]);
            let body = &framed[4..];
            let mut hasher = Crc32::new();
            hasher.update(body);
            if hasher.finalize() != crc {
                warn!("log ends in record with checksum mismatch, truncating replay");
                return Ok(());
            }

            match parse_body(body) {
                Ok(record) => apply(record),
                Err(WalError::Corrupt(msg)) => {
                    warn!(%msg, "log ends in unparseable record, truncating replay");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_body(mut body: &[u8]) -> Result<WalRecord, WalError> {
    let short = |what: &str| WalError::Corrupt(format!("record body truncated at {what}"));

    let ts = body.read_u64::<LittleEndian>().map_err(|_| short("ts"))?;
    let op = body.read_u8().map_err(|_| short("op"))?;
    let key_len = body
        .read_u32::<LittleEndian>()
        .map_err(|_| short("key length"))? as usize;
    if body.len() < key_len {
        return Err(short("key"));
    }
    let key = String::from_utf8(body[..key_len].to_vec())
        .map_err(|_| WalError::Corrupt("key is not valid utf-8".to_string()))?;
    body = &body[key_len..];

    match op {
        OP_SET => {
            let val_len = body
                .read_u32::<LittleEndian>()
                .map_err(|_| short("value length"))? as usize;
            if body.len() < val_len {
                return Err(short("value"));
            }
            let value = body[..val_len].to_vec();
            Ok(WalRecord::Set { key, value, ts })
        }
        OP_DELETE => Ok(WalRecord::Delete { key, ts }),
        other => Err(WalError::Corrupt(format!("unknown op tag {other}"))),
    }
}
