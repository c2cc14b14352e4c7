//! Log + index table driver
//!
//! The [`Log`] is the source of truth. Every table write becomes one log
//! record holding the batch and its expectations. The index is a map derived
//! by replaying records past `synced_till`; it may lag the log between calls
//! but every operation syncs it first, so it converges.
//!
//! ## Write protocol
//!
//! 1. Sync the index to the log tail
//! 2. Validate the batch's expected versions against the index
//! 3. Append conditionally at the observed tail
//! 4. If the tail moved, go back to 1 (the batch may now conflict)
//! 5. Sync again, which applies the record just appended
//!
//! A record's version is `Version::Sequence(position)`. A replayed record
//! whose expectations do not hold is skipped; with conditional appends this
//! only happens if the log was written outside this protocol.

use crate::table::{check_entries, check_pair, conflict, TableEntry, VersionedTable, VersionedValue};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use schemata_core::error::{Error, Result};
use schemata_core::{RecordKey, RecordValue, Version, Versioned};
use schemata_durability::log::{Log, LogPosition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Precondition of one logged write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Expectation {
    Absent,
    Version(Version),
    Any,
}

impl Expectation {
    fn holds(&self, actual: Option<Version>) -> bool {
        match self {
            Expectation::Absent => actual.is_none(),
            Expectation::Version(v) => actual == Some(*v),
            Expectation::Any => true,
        }
    }

    fn expected(&self) -> Option<Version> {
        match self {
            Expectation::Version(v) => Some(*v),
            _ => None,
        }
    }
}

/// One write within a logged batch; `value: None` removes the key
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogWrite {
    key: RecordKey,
    value: Option<RecordValue>,
    expectation: Expectation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogBatch {
    writes: Vec<LogWrite>,
}

/// Materialized view of the log
#[derive(Default)]
struct Index {
    synced_till: Option<LogPosition>,
    entries: FxHashMap<RecordKey, VersionedValue>,
}

impl Index {
    fn validate(&self, writes: &[LogWrite]) -> Result<()> {
        for write in writes {
            let actual = self.entries.get(&write.key).map(|e| e.version);
            if !write.expectation.holds(actual) {
                return Err(conflict(&write.key, write.expectation.expected(), actual));
            }
        }
        Ok(())
    }

    fn apply(&mut self, position: LogPosition, batch: LogBatch) {
        let version = Version::seq(position.0);
        for write in batch.writes {
            match write.value {
                Some(value) => {
                    self.entries.insert(write.key, Versioned::new(value, version));
                }
                None => {
                    self.entries.remove(&write.key);
                }
            }
        }
    }
}

/// Table whose state is a replayed [`Log`]
pub struct LogTable {
    name: String,
    log: Arc<dyn Log>,
    index: Mutex<Index>,
}

impl LogTable {
    /// Table over `log`; the index is built lazily on first use
    pub fn new(name: impl Into<String>, log: Arc<dyn Log>) -> Self {
        LogTable {
            name: name.into(),
            log,
            index: Mutex::new(Index::default()),
        }
    }

    /// Last log position reflected in the index
    pub fn synced_till(&self) -> Option<LogPosition> {
        self.index.lock().synced_till
    }

    fn sync(&self, index: &mut Index) -> Result<()> {
        let from = index.synced_till.map(|p| p.next()).unwrap_or(LogPosition(0));
        for (position, payload) in self.log.read_from(from)? {
            let batch: LogBatch = bincode::deserialize(&payload).map_err(|e| {
                Error::Corruption(format!(
                    "table {} log record {}: {}",
                    self.name, position, e
                ))
            })?;
            if index.validate(&batch.writes).is_ok() {
                index.apply(position, batch);
            } else {
                warn!(table = %self.name, %position, "Skipping log record with stale expectations");
            }
            index.synced_till = Some(position);
        }
        Ok(())
    }

    fn write(&self, writes: Vec<LogWrite>) -> Result<Version> {
        let payload = bincode::serialize(&LogBatch {
            writes: writes.clone(),
        })?;
        let mut index = self.index.lock();
        loop {
            self.sync(&mut index)?;
            index.validate(&writes)?;
            match self.log.append(payload.clone(), index.synced_till) {
                Ok(position) => {
                    self.sync(&mut index)?;
                    return Ok(Version::seq(position.0));
                }
                Err(e) if e.is_conflict() => {
                    debug!(table = %self.name, "Log tail moved, revalidating");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl VersionedTable for LogTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_entry(&self, key: RecordKey, value: RecordValue) -> Result<bool> {
        check_pair(&key, &value)?;
        let write = LogWrite {
            key,
            value: Some(value),
            expectation: Expectation::Absent,
        };
        match self.write(vec![write]) {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn update_entries(&self, entries: Vec<TableEntry>) -> Result<Vec<Version>> {
        check_entries(&entries)?;
        let count = entries.len();
        let writes = entries
            .into_iter()
            .map(|entry| LogWrite {
                key: entry.key,
                value: Some(entry.value),
                expectation: match entry.expected {
                    Some(v) => Expectation::Version(v),
                    None => Expectation::Absent,
                },
            })
            .collect();
        let version = self.write(writes)?;
        Ok(vec![version; count])
    }

    fn get_entries_with_version(&self, keys: &[RecordKey]) -> Result<Vec<Option<VersionedValue>>> {
        let mut index = self.index.lock();
        self.sync(&mut index)?;
        Ok(keys.iter().map(|k| index.entries.get(k).cloned()).collect())
    }

    fn get_all_entries(
        &self,
        predicate: &dyn Fn(&RecordKey) -> bool,
    ) -> Result<Vec<(RecordKey, VersionedValue)>> {
        let mut index = self.index.lock();
        self.sync(&mut index)?;
        Ok(index
            .entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn remove_entry(&self, key: &RecordKey, expected: Option<Version>) -> Result<()> {
        {
            let mut index = self.index.lock();
            self.sync(&mut index)?;
            if !index.entries.contains_key(key) {
                return Ok(());
            }
        }
        let write = LogWrite {
            key: key.clone(),
            value: None,
            expectation: match expected {
                Some(v) => Expectation::Version(v),
                None => Expectation::Any,
            },
        };
        self.write(vec![write]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{TableExt, WriteBatch};
    use schemata_core::records::{
        CodecTypesKey, CodecTypesRecord, EtagKey, EtagRecord, LatestEncodingIdKey,
        LatestEncodingIdRecord,
    };
    use schemata_core::{CodecType, EncodingId};
    use schemata_durability::log::{FileLog, MemoryLog};
    use schemata_durability::wal::DurabilityMode;
    use tempfile::TempDir;

    fn latest(id: i32) -> LatestEncodingIdRecord {
        LatestEncodingIdRecord {
            encoding_id: EncodingId::new(id),
        }
    }

    #[test]
    fn test_versions_are_log_positions() {
        let log: Arc<dyn Log> = Arc::new(MemoryLog::new());
        let table = LogTable::new("t", Arc::clone(&log));

        assert!(table.add(EtagKey, EtagRecord).unwrap());
        assert!(!table.add(EtagKey, EtagRecord).unwrap());

        let v = table.update(LatestEncodingIdKey, latest(0), None).unwrap();
        assert_eq!(v, Version::seq(1));
        assert_eq!(log.tail().unwrap(), Some(LogPosition(1)));
        assert_eq!(
            table.get_with_version(&LatestEncodingIdKey).unwrap().unwrap().version,
            Version::seq(1)
        );
    }

    #[test]
    fn test_conflicting_batch_is_not_appended() {
        let log: Arc<dyn Log> = Arc::new(MemoryLog::new());
        let table = LogTable::new("t", Arc::clone(&log));
        table.add(EtagKey, EtagRecord).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put(EtagKey, EtagRecord, Some(Version::seq(99)))
            .create(CodecTypesKey, CodecTypesRecord::default());
        assert!(batch.commit(&table).unwrap_err().is_conflict());

        assert_eq!(log.tail().unwrap(), Some(LogPosition(0)));
        assert!(table.get(&CodecTypesKey).unwrap().is_none());
    }

    #[test]
    fn test_two_tables_over_one_log_converge() {
        let log: Arc<dyn Log> = Arc::new(MemoryLog::new());
        let a = LogTable::new("t", Arc::clone(&log));
        let b = LogTable::new("t", Arc::clone(&log));

        let v0 = a.update(LatestEncodingIdKey, latest(0), None).unwrap();
        // b has not synced yet; its write must first observe a's record
        assert!(b
            .update(LatestEncodingIdKey, latest(5), None)
            .unwrap_err()
            .is_conflict());

        b.update(LatestEncodingIdKey, latest(1), Some(v0)).unwrap();
        assert_eq!(a.get(&LatestEncodingIdKey).unwrap(), Some(latest(1)));
        assert_eq!(a.synced_till(), b.synced_till());
    }

    #[test]
    fn test_remove_entry() {
        let table = LogTable::new("t", Arc::new(MemoryLog::new()));
        table.add(EtagKey, EtagRecord).unwrap();
        let key: RecordKey = EtagKey.into();

        assert!(table
            .remove_entry(&key, Some(Version::seq(7)))
            .unwrap_err()
            .is_conflict());
        table.remove_entry(&key, Some(Version::seq(0))).unwrap();
        assert!(table.get_entry(&key).unwrap().is_none());
        // Absent key: no-op, nothing appended
        table.remove_entry(&key, None).unwrap();
        assert_eq!(table.synced_till(), Some(LogPosition(1)));
    }

    #[test]
    fn test_index_rebuilt_from_file_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.log");
        {
            let log: Arc<dyn Log> = Arc::new(FileLog::open(&path, DurabilityMode::Strict).unwrap());
            let table = LogTable::new("t", log);
            table
                .add(
                    CodecTypesKey,
                    CodecTypesRecord {
                        codec_types: vec![CodecType::none()],
                    },
                )
                .unwrap();
            let v = table.update(LatestEncodingIdKey, latest(0), None).unwrap();
            table.update(LatestEncodingIdKey, latest(1), Some(v)).unwrap();
        }

        let log: Arc<dyn Log> = Arc::new(FileLog::open(&path, DurabilityMode::Strict).unwrap());
        let table = LogTable::new("t", log);
        assert_eq!(table.synced_till(), None);
        assert_eq!(table.get(&LatestEncodingIdKey).unwrap(), Some(latest(1)));
        assert_eq!(
            table.get(&CodecTypesKey).unwrap().unwrap().codec_types,
            vec![CodecType::none()]
        );
        assert_eq!(table.synced_till(), Some(LogPosition(2)));
    }
}
