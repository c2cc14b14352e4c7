//! Store-backed table driver
//!
//! Each record pair is stored as bincode-encoded key and value bytes in a
//! table of an external [`VersionedStore`]. The store supplies versions and
//! conditional batch writes; this driver only translates.
//!
//! Reads of immutable keys are served from an [`ImmutableCache`] shared by
//! every table of a provider. Nothing else is ever cached.

use crate::table::{check_entries, check_pair, TableEntry, VersionedTable, VersionedValue};
use dashmap::DashMap;
use schemata_core::error::{Error, Result};
use schemata_core::records::{decode_key, decode_value, encode_key, encode_value};
use schemata_core::{RecordKey, RecordValue, Version, Versioned};
use schemata_durability::store::{StoreWrite, VersionedStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Records an [`ImmutableCache`] holds by default
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Cache of immutable records, keyed by table name and record key
///
/// Holds at most `capacity` records. Entries never go stale, so when the
/// cache is full an arbitrary entry is dropped to make room.
pub struct ImmutableCache {
    entries: DashMap<(String, RecordKey), VersionedValue>,
    capacity: usize,
    hits: AtomicU64,
}

impl Default for ImmutableCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ImmutableCache {
    /// Empty cache of [`DEFAULT_CACHE_CAPACITY`] records
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cache holding at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        ImmutableCache {
            entries: DashMap::new(),
            capacity,
            hits: AtomicU64::new(0),
        }
    }

    /// Cached record, if any
    pub fn get(&self, table: &str, key: &RecordKey) -> Option<VersionedValue> {
        if !key.is_immutable() {
            return None;
        }
        let hit = self
            .entries
            .get(&(table.to_string(), key.clone()))
            .map(|e| e.value().clone());
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Remember a record; keys outside the immutable set are ignored
    pub fn insert(&self, table: &str, key: &RecordKey, value: &VersionedValue) {
        if !key.is_immutable() || self.capacity == 0 {
            return;
        }
        let cache_key = (table.to_string(), key.clone());
        if self.entries.contains_key(&cache_key) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            match victim {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }
        self.entries.insert(cache_key, value.clone());
    }

    /// Forget everything cached for `table`
    pub fn evict_table(&self, table: &str) {
        self.entries.retain(|(t, _), _| t != table);
    }

    /// Number of cached records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most records the cache holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reads served from the cache so far
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Table stored in a [`VersionedStore`]
pub struct PersistedTable<S: VersionedStore> {
    name: String,
    store: Arc<S>,
    cache: Arc<ImmutableCache>,
}

impl<S: VersionedStore> PersistedTable<S> {
    /// Table view over an existing store table
    pub fn new(name: impl Into<String>, store: Arc<S>, cache: Arc<ImmutableCache>) -> Self {
        PersistedTable {
            name: name.into(),
            store,
            cache,
        }
    }
}

impl<S: VersionedStore> VersionedTable for PersistedTable<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_entry(&self, key: RecordKey, value: RecordValue) -> Result<bool> {
        check_pair(&key, &value)?;
        let key_bytes = encode_key(&key)?;
        let value_bytes = encode_value(&value)?;
        match self.store.put_if_absent(&self.name, &key_bytes, &value_bytes)? {
            Some(version) => {
                self.cache
                    .insert(&self.name, &key, &Versioned::new(value, version));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_entries(&self, entries: Vec<TableEntry>) -> Result<Vec<Version>> {
        check_entries(&entries)?;
        let writes = entries
            .iter()
            .map(|entry| {
                Ok(StoreWrite {
                    key: encode_key(&entry.key)?,
                    value: encode_value(&entry.value)?,
                    expected: entry.expected,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let versions = self.store.put_all(&self.name, writes)?;
        if versions.len() != entries.len() {
            return Err(Error::StorageError(format!(
                "table {}: store returned {} versions for {} writes",
                self.name,
                versions.len(),
                entries.len()
            )));
        }

        for (entry, version) in entries.into_iter().zip(&versions) {
            self.cache
                .insert(&self.name, &entry.key, &Versioned::new(entry.value, *version));
        }
        Ok(versions)
    }

    fn get_entries_with_version(&self, keys: &[RecordKey]) -> Result<Vec<Option<VersionedValue>>> {
        let mut results: Vec<Option<VersionedValue>> =
            keys.iter().map(|k| self.cache.get(&self.name, k)).collect();

        let missing: Vec<usize> = (0..keys.len()).filter(|&i| results[i].is_none()).collect();
        if missing.is_empty() {
            trace!(table = %self.name, keys = keys.len(), "Served batch from cache");
            return Ok(results);
        }

        let missing_bytes = missing
            .iter()
            .map(|&i| encode_key(&keys[i]))
            .collect::<Result<Vec<_>>>()?;
        let fetched = self.store.get_all(&self.name, &missing_bytes)?;

        for (&i, record) in missing.iter().zip(fetched) {
            if let Some(record) = record {
                let value = Versioned::new(decode_value(&record.value)?, record.version);
                self.cache.insert(&self.name, &keys[i], &value);
                results[i] = Some(value);
            }
        }
        Ok(results)
    }

    fn get_all_entries(
        &self,
        predicate: &dyn Fn(&RecordKey) -> bool,
    ) -> Result<Vec<(RecordKey, VersionedValue)>> {
        let mut out = Vec::new();
        for (key_bytes, record) in self.store.scan(&self.name)? {
            let key = decode_key(&key_bytes)?;
            if predicate(&key) {
                let value = Versioned::new(decode_value(&record.value)?, record.version);
                out.push((key, value));
            }
        }
        Ok(out)
    }

    fn remove_entry(&self, key: &RecordKey, expected: Option<Version>) -> Result<()> {
        self.store.remove(&self.name, &encode_key(key)?, expected)
    }
}
