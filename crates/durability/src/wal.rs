//! Append-only WAL file with configurable durability
//!
//! ## File Format
//!
//! A sequence of framed entries (see [`crate::encoding`]).
//!
//! ## File Operations
//!
//! - `WalFile::open()` - Open existing file or create a new one, truncating a torn tail
//! - `WalFile::append()` - Write a framed entry to the end of the file
//! - `WalFile::read_entries()` - Scan from offset, decode entries
//! - `WalFile::fsync()` - Force sync to disk
//!
//! ## Durability Modes
//!
//! - `Strict` - fsync after every append (slow, maximum durability)
//! - `Batched` - fsync every N appends OR T ms (DEFAULT, good balance)

use crate::encoding::{decode_entry, encode_entry};
use schemata_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// Durability mode configuration
///
/// Controls when fsync is called to ensure data reaches disk.
///
/// # Default
///
/// The default mode is `Batched { interval_ms: 100, batch_size: 1000 }`,
/// which fsyncs every 100ms or every 1000 writes, whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// fsync after every append
    Strict,

    /// fsync every N appends OR every T milliseconds
    ///
    /// May lose up to batch_size appends or interval_ms of data on crash.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

/// An entry read back from a WAL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// File offset of the entry
    pub offset: u64,
    /// Entry type tag
    pub entry_type: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Append-only log file
///
/// Not internally synchronized: owners wrap it in the lock that also guards
/// whatever in-memory state the file backs.
pub struct WalFile {
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
    durability_mode: DurabilityMode,
    last_fsync: Instant,
    writes_since_fsync: usize,
}

impl WalFile {
    /// Open an existing WAL or create a new one
    ///
    /// Creates parent directories if needed. Returns the handle together with
    /// every valid entry in the file. A torn or corrupt tail is cut off so
    /// later appends start at a clean entry boundary.
    pub fn open<P: AsRef<Path>>(
        path: P,
        durability_mode: DurabilityMode,
    ) -> Result<(Self, Vec<WalRecord>)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (records, valid_len) = scan_entries(&contents, 0);
        if (valid_len as usize) < contents.len() {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = contents.len(),
                "Truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(path = %path.display(), entries = records.len(), "Opened WAL");

        Ok((
            WalFile {
                path,
                writer: BufWriter::new(file),
                size: valid_len,
                durability_mode,
                last_fsync: Instant::now(),
                writes_since_fsync: 0,
            },
            records,
        ))
    }

    /// Append an entry, honoring the durability mode
    ///
    /// Returns the offset the entry was written at.
    pub fn append(&mut self, entry_type: u8, payload: &[u8]) -> Result<u64> {
        let offset = self.size;
        let encoded = encode_entry(entry_type, payload);

        self.writer.write_all(&encoded).map_err(|e| {
            Error::StorageError(format!("Failed to write entry at offset {}: {}", offset, e))
        })?;
        self.size += encoded.len() as u64;

        match self.durability_mode {
            DurabilityMode::Strict => self.fsync()?,
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                self.writes_since_fsync += 1;
                let elapsed = self.last_fsync.elapsed().as_millis() as u64;
                if elapsed >= interval_ms || self.writes_since_fsync >= batch_size {
                    self.fsync()?;
                } else {
                    self.flush()?;
                }
            }
        }

        Ok(offset)
    }

    /// Flush buffered writes to OS buffers
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::StorageError(format!("Failed to flush WAL: {}", e)))
    }

    /// Force sync to disk (flush + fsync)
    pub fn fsync(&mut self) -> Result<()> {
        self.flush()?;
        self.writer
            .get_mut()
            .sync_all()
            .map_err(|e| Error::StorageError(format!("Failed to fsync: {}", e)))?;
        self.last_fsync = Instant::now();
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Read all entries starting at `start_offset`
    ///
    /// Stops at the first entry that fails to decode.
    pub fn read_entries(&mut self, start_offset: u64) -> Result<Vec<WalRecord>> {
        self.flush()?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        Ok(scan_entries(&contents, start_offset).0)
    }

    /// Current file size (offset of the next append)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durability mode
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

impl Drop for WalFile {
    fn drop(&mut self) {
        let _ = self.fsync();
    }
}

/// Decode entries until the first failure; returns them and the end offset of the last one
fn scan_entries(buf: &[u8], base_offset: u64) -> (Vec<WalRecord>, u64) {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        let offset = base_offset + pos as u64;
        match decode_entry(&buf[pos..], offset) {
            Ok(decoded) => {
                records.push(WalRecord {
                    offset,
                    entry_type: decoded.entry_type,
                    payload: decoded.payload,
                });
                pos += decoded.consumed;
            }
            Err(Error::IncompleteEntry { .. }) => break,
            Err(e) => {
                warn!(offset, error = %e, "Stopping WAL scan at corrupt entry");
                break;
            }
        }
    }

    (records, base_offset + pos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{TYPE_LOG_RECORD, TYPE_STORE_OP};
    use tempfile::TempDir;

    #[test]
    fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal").join("segment.wal");

        {
            let (mut wal, existing) = WalFile::open(&path, DurabilityMode::Strict).unwrap();
            assert!(existing.is_empty());
            assert_eq!(wal.append(TYPE_LOG_RECORD, b"a").unwrap(), 0);
            let second = wal.append(TYPE_STORE_OP, b"bb").unwrap();
            assert!(second > 0);
        }

        let (wal, records) = WalFile::open(&path, DurabilityMode::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"a");
        assert_eq!(records[1].entry_type, TYPE_STORE_OP);
        assert_eq!(records[1].payload, b"bb");
        assert_eq!(wal.size(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment.wal");

        {
            let (mut wal, _) = WalFile::open(&path, DurabilityMode::Strict).unwrap();
            wal.append(TYPE_LOG_RECORD, b"complete").unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash halfway through the next write
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            let partial = encode_entry(TYPE_LOG_RECORD, b"never finished");
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        let (mut wal, records) = WalFile::open(&path, DurabilityMode::Strict).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(wal.size(), good_len);

        wal.append(TYPE_LOG_RECORD, b"after recovery").unwrap();
        let all = wal.read_entries(0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].payload, b"after recovery");
    }

    #[test]
    fn test_read_entries_from_offset() {
        let dir = TempDir::new().unwrap();
        let (mut wal, _) = WalFile::open(dir.path().join("w.wal"), DurabilityMode::default()).unwrap();

        wal.append(TYPE_LOG_RECORD, b"one").unwrap();
        let second = wal.append(TYPE_LOG_RECORD, b"two").unwrap();

        let tail = wal.read_entries(second).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].offset, second);
        assert_eq!(tail[0].payload, b"two");
    }

    #[test]
    fn test_batched_mode_flushes_for_readers() {
        let dir = TempDir::new().unwrap();
        let mode = DurabilityMode::Batched {
            interval_ms: 60_000,
            batch_size: 1_000,
        };
        let (mut wal, _) = WalFile::open(dir.path().join("w.wal"), mode).unwrap();
        wal.append(TYPE_LOG_RECORD, b"buffered").unwrap();
        assert_eq!(wal.read_entries(0).unwrap().len(), 1);
    }
}
