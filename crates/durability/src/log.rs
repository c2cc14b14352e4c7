//! Position-addressed, conditionally appended logs
//!
//! A [`Log`] is the source of truth for log-backed tables. Appends are
//! conditional on the caller's view of the tail: if anyone else appended in
//! between, the append fails with `WriteConflict` and nothing is written.
//!
//! Positions start at 0 and increase by one per record.

use crate::encoding::TYPE_LOG_RECORD;
use crate::wal::{DurabilityMode, WalFile};
use parking_lot::{Mutex, RwLock};
use schemata_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Position of a record within a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition(pub u64);

impl LogPosition {
    /// Position following this one
    pub const fn next(&self) -> Self {
        LogPosition(self.0 + 1)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Append-only log with conditional appends
pub trait Log: Send + Sync {
    /// Position of the last record, `None` for an empty log
    fn tail(&self) -> Result<Option<LogPosition>>;

    /// Append `payload` if the tail is still `expected_tail`
    ///
    /// # Errors
    ///
    /// - `WriteConflict` if another record was appended since the caller read the tail
    fn append(&self, payload: Vec<u8>, expected_tail: Option<LogPosition>) -> Result<LogPosition>;

    /// Record at `position`
    ///
    /// # Errors
    ///
    /// - `NotFound` if nothing has been written at `position`
    fn read_at(&self, position: LogPosition) -> Result<Arc<[u8]>>;

    /// Every record from `position` (inclusive) to the tail
    fn read_from(&self, position: LogPosition) -> Result<Vec<(LogPosition, Arc<[u8]>)>>;
}

fn tail_of(records: &[Arc<[u8]>]) -> Option<LogPosition> {
    records.len().checked_sub(1).map(|i| LogPosition(i as u64))
}

fn check_tail(records: &[Arc<[u8]>], expected_tail: Option<LogPosition>) -> Result<()> {
    let actual = tail_of(records);
    if actual != expected_tail {
        return Err(Error::WriteConflict(format!(
            "log tail moved: expected {:?}, found {:?}",
            expected_tail, actual
        )));
    }
    Ok(())
}

fn read_range(records: &[Arc<[u8]>], position: LogPosition) -> Vec<(LogPosition, Arc<[u8]>)> {
    records
        .iter()
        .enumerate()
        .skip(position.0 as usize)
        .map(|(i, r)| (LogPosition(i as u64), Arc::clone(r)))
        .collect()
}

fn read_one(records: &[Arc<[u8]>], position: LogPosition) -> Result<Arc<[u8]>> {
    records
        .get(position.0 as usize)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("log position {}", position)))
}

// ============================================================================
// In-memory log
// ============================================================================

/// Log held entirely in memory
#[derive(Default)]
pub struct MemoryLog {
    records: RwLock<Vec<Arc<[u8]>>>,
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

impl Log for MemoryLog {
    fn tail(&self) -> Result<Option<LogPosition>> {
        Ok(tail_of(&self.records.read()))
    }

    fn append(&self, payload: Vec<u8>, expected_tail: Option<LogPosition>) -> Result<LogPosition> {
        let mut records = self.records.write();
        check_tail(&records, expected_tail)?;
        records.push(payload.into());
        Ok(LogPosition(records.len() as u64 - 1))
    }

    fn read_at(&self, position: LogPosition) -> Result<Arc<[u8]>> {
        read_one(&self.records.read(), position)
    }

    fn read_from(&self, position: LogPosition) -> Result<Vec<(LogPosition, Arc<[u8]>)>> {
        Ok(read_range(&self.records.read(), position))
    }
}

// ============================================================================
// File-backed log
// ============================================================================

struct FileLogState {
    wal: WalFile,
    records: Vec<Arc<[u8]>>,
}

/// Log persisted to a WAL file
///
/// Records are mirrored in memory after recovery so reads never touch disk.
pub struct FileLog {
    path: PathBuf,
    state: Mutex<FileLogState>,
}

impl FileLog {
    /// Open (or create) the log stored at `path`
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (wal, entries) = WalFile::open(&path, durability_mode)?;

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.entry_type != TYPE_LOG_RECORD {
                warn!(
                    path = %path.display(),
                    offset = entry.offset,
                    entry_type = entry.entry_type,
                    "Skipping foreign entry in log file"
                );
                continue;
            }
            records.push(entry.payload.into());
        }

        info!(path = %path.display(), records = records.len(), "Recovered log");

        Ok(FileLog {
            path,
            state: Mutex::new(FileLogState { wal, records }),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Log for FileLog {
    fn tail(&self) -> Result<Option<LogPosition>> {
        Ok(tail_of(&self.state.lock().records))
    }

    fn append(&self, payload: Vec<u8>, expected_tail: Option<LogPosition>) -> Result<LogPosition> {
        let mut state = self.state.lock();
        check_tail(&state.records, expected_tail)?;
        state.wal.append(TYPE_LOG_RECORD, &payload)?;
        state.records.push(payload.into());
        Ok(LogPosition(state.records.len() as u64 - 1))
    }

    fn read_at(&self, position: LogPosition) -> Result<Arc<[u8]>> {
        read_one(&self.state.lock().records, position)
    }

    fn read_from(&self, position: LogPosition) -> Result<Vec<(LogPosition, Arc<[u8]>)>> {
        Ok(read_range(&self.state.lock().records, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn exercise_conditional_append(log: &dyn Log) {
        assert_eq!(log.tail().unwrap(), None);

        let p0 = log.append(b"first".to_vec(), None).unwrap();
        assert_eq!(p0, LogPosition(0));

        // Stale view of the tail
        let err = log.append(b"stale".to_vec(), None).unwrap_err();
        assert!(err.is_conflict());

        let p1 = log.append(b"second".to_vec(), Some(p0)).unwrap();
        assert_eq!(p1, LogPosition(1));
        assert_eq!(log.tail().unwrap(), Some(p1));

        assert_eq!(&*log.read_at(p0).unwrap(), b"first");
        assert!(log.read_at(LogPosition(5)).unwrap_err().is_not_found());

        let tail = log.read_from(p1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(&*tail[0].1, b"second");
        assert!(log.read_from(LogPosition(9)).unwrap().is_empty());
    }

    #[test]
    fn test_memory_log_conditional_append() {
        exercise_conditional_append(&MemoryLog::new());
    }

    #[test]
    fn test_file_log_conditional_append() {
        let dir = TempDir::new().unwrap();
        let log = FileLog::open(dir.path().join("g.log"), DurabilityMode::Strict).unwrap();
        exercise_conditional_append(&log);
    }

    #[test]
    fn test_file_log_recovers_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.log");
        {
            let log = FileLog::open(&path, DurabilityMode::Strict).unwrap();
            let p = log.append(b"a".to_vec(), None).unwrap();
            log.append(b"b".to_vec(), Some(p)).unwrap();
        }

        let log = FileLog::open(&path, DurabilityMode::Strict).unwrap();
        assert_eq!(log.tail().unwrap(), Some(LogPosition(1)));
        assert_eq!(&*log.read_at(LogPosition(1)).unwrap(), b"b");
        log.append(b"c".to_vec(), Some(LogPosition(1))).unwrap();
    }

    #[test]
    fn test_concurrent_appends_at_same_tail() {
        let log = Arc::new(MemoryLog::new());
        let barrier = Arc::new(Barrier::new(8));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    barrier.wait();
                    if log.append(vec![i as u8], None).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(log.tail().unwrap(), Some(LogPosition(0)));
    }
}
