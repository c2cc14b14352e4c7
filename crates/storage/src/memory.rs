//! In-memory table driver
//!
//! One mutex per table instance guards the whole map, so every operation is
//! trivially atomic and batch reads are consistent snapshots. Versions come
//! from one counter per table, so a key that is removed and written again
//! never gets a version it had before.

use crate::table::{check_entries, check_pair, conflict, TableEntry, VersionedTable, VersionedValue};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use schemata_core::error::Result;
use schemata_core::{RecordKey, RecordValue, Version, Versioned};

/// Table held entirely in memory
pub struct InMemoryTable {
    name: String,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: FxHashMap<RecordKey, VersionedValue>,
    last_version: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> Version {
        self.last_version += 1;
        Version::counter(self.last_version)
    }
}

impl InMemoryTable {
    /// Create an empty table
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryTable {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl VersionedTable for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_entry(&self, key: RecordKey, value: RecordValue) -> Result<bool> {
        check_pair(&key, &value)?;
        let mut state = self.state.lock();
        if state.entries.contains_key(&key) {
            return Ok(false);
        }
        let version = state.next_version();
        state.entries.insert(key, Versioned::new(value, version));
        Ok(true)
    }

    fn update_entries(&self, batch: Vec<TableEntry>) -> Result<Vec<Version>> {
        check_entries(&batch)?;
        let mut state = self.state.lock();

        for entry in &batch {
            let actual = state.entries.get(&entry.key).map(|e| e.version);
            if actual != entry.expected {
                return Err(conflict(&entry.key, entry.expected, actual));
            }
        }

        Ok(batch
            .into_iter()
            .map(|entry| {
                let version = state.next_version();
                state.entries.insert(entry.key, Versioned::new(entry.value, version));
                version
            })
            .collect())
    }

    fn get_entries_with_version(&self, keys: &[RecordKey]) -> Result<Vec<Option<VersionedValue>>> {
        let state = self.state.lock();
        Ok(keys.iter().map(|k| state.entries.get(k).cloned()).collect())
    }

    fn get_all_entries(
        &self,
        predicate: &dyn Fn(&RecordKey) -> bool,
    ) -> Result<Vec<(RecordKey, VersionedValue)>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn remove_entry(&self, key: &RecordKey, expected: Option<Version>) -> Result<()> {
        let mut state = self.state.lock();
        let actual = match state.entries.get(key) {
            Some(e) => e.version,
            None => return Ok(()),
        };
        if let Some(expected) = expected {
            if expected != actual {
                return Err(conflict(key, Some(expected), Some(actual)));
            }
        }
        state.entries.remove(key);
        Ok(())
    }
}
