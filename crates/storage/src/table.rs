//! Versioned table contract
//!
//! A table maps [`RecordKey`]s to [`RecordValue`]s, each with an opaque
//! [`Version`]. Writes are optimistic: a write names the version it expects
//! to replace (`None` meaning "must not exist"), and a batch of writes applies
//! entirely or not at all.
//!
//! The trait is object safe so domain code can hold `Arc<dyn VersionedTable>`
//! without knowing which driver is behind it. Typed access lives in
//! [`TableExt`] and [`WriteBatch`].

use rustc_hash::FxHashSet;
use schemata_core::error::{Error, Result};
use schemata_core::{Etag, RecordKey, RecordValue, TableKey, Version, Versioned};

/// Erased read result
pub type VersionedValue = Versioned<RecordValue>;

/// One conditional write
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    /// Key to write
    pub key: RecordKey,
    /// Value to store
    pub value: RecordValue,
    /// Version the key must currently have; `None` means the key must be absent
    pub expected: Option<Version>,
}

impl TableEntry {
    /// Build an entry from a typed key/value pair
    pub fn new<K: TableKey>(key: K, value: K::Value, expected: Option<Version>) -> Self {
        TableEntry {
            key: key.into(),
            value: value.into(),
            expected,
        }
    }
}

/// Optimistically concurrent key-value table
pub trait VersionedTable: Send + Sync {
    /// Table name
    fn name(&self) -> &str;

    /// Insert unless present; never overwrites
    ///
    /// Returns `true` if the entry was created, `false` if the key already existed.
    fn add_entry(&self, key: RecordKey, value: RecordValue) -> Result<bool>;

    /// Apply every entry or none
    ///
    /// Returns the new version of each entry, in order.
    ///
    /// # Errors
    ///
    /// - `WriteConflict` if any entry's expected version does not match
    /// - `TypeMismatch` if a value is not the type paired with its key
    /// - `InvalidOperation` if a key appears twice
    fn update_entries(&self, entries: Vec<TableEntry>) -> Result<Vec<Version>>;

    /// Read several keys in one consistent snapshot; missing keys yield `None`
    fn get_entries_with_version(&self, keys: &[RecordKey]) -> Result<Vec<Option<VersionedValue>>>;

    /// Every entry whose key satisfies `predicate`
    fn get_all_entries(
        &self,
        predicate: &dyn Fn(&RecordKey) -> bool,
    ) -> Result<Vec<(RecordKey, VersionedValue)>>;

    /// Remove a key if it has version `expected` (unconditionally when `None`)
    ///
    /// Removing an absent key is a no-op.
    fn remove_entry(&self, key: &RecordKey, expected: Option<Version>) -> Result<()>;

    /// Conditional single-key write
    fn update_entry(
        &self,
        key: RecordKey,
        value: RecordValue,
        expected: Option<Version>,
    ) -> Result<Version> {
        let versions = self.update_entries(vec![TableEntry {
            key,
            value,
            expected,
        }])?;
        versions
            .into_iter()
            .next()
            .ok_or_else(|| Error::StorageError("write produced no version".to_string()))
    }

    /// Read one key with its version
    fn get_entry_with_version(&self, key: &RecordKey) -> Result<Option<VersionedValue>> {
        Ok(self
            .get_entries_with_version(std::slice::from_ref(key))?
            .into_iter()
            .next()
            .flatten())
    }

    /// Read one key
    fn get_entry(&self, key: &RecordKey) -> Result<Option<RecordValue>> {
        Ok(self.get_entry_with_version(key)?.map(Versioned::into_value))
    }

    /// Read several keys in one consistent snapshot
    fn get_entries(&self, keys: &[RecordKey]) -> Result<Vec<Option<RecordValue>>> {
        Ok(self
            .get_entries_with_version(keys)?
            .into_iter()
            .map(|e| e.map(Versioned::into_value))
            .collect())
    }

    /// Every key in the table
    fn get_all_keys(&self) -> Result<Vec<RecordKey>> {
        Ok(self
            .get_all_entries(&|_| true)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Wrap the version of the sentinel record as an etag
    fn to_etag(&self, version: Option<Version>) -> Etag {
        Etag::from_version(version)
    }

    /// Version an etag stands for
    fn from_etag(&self, etag: &Etag) -> Option<Version> {
        etag.version()
    }
}

/// Reject batches with mismatched value types or repeated keys
pub fn check_entries(entries: &[TableEntry]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for entry in entries {
        check_pair(&entry.key, &entry.value)?;
        if !seen.insert(&entry.key) {
            return Err(Error::InvalidOperation(format!(
                "key {} written twice in one batch",
                entry.key
            )));
        }
    }
    Ok(())
}

/// Reject a value that is not the type paired with its key
pub fn check_pair(key: &RecordKey, value: &RecordValue) -> Result<()> {
    if key.accepts(value) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: key.kind(),
            actual: value.kind(),
        })
    }
}

/// Conflict error for a key whose version is not the expected one
pub fn conflict(key: &RecordKey, expected: Option<Version>, actual: Option<Version>) -> Error {
    Error::WriteConflict(format!(
        "{}: expected {}, found {}",
        key,
        describe(expected),
        describe(actual)
    ))
}

fn describe(version: Option<Version>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "absent".to_string(),
    }
}

/// Convert an erased read result into the value type of `K`
pub fn downcast<K: TableKey>(entry: Option<VersionedValue>) -> Result<Option<Versioned<K::Value>>> {
    entry
        .map(|e| e.try_map(<K::Value as TryFrom<RecordValue>>::try_from))
        .transpose()
}

// ============================================================================
// Typed access
// ============================================================================

/// Typed helpers over any [`VersionedTable`]
pub trait TableExt: VersionedTable {
    /// Read a typed value
    fn get<K: TableKey>(&self, key: &K) -> Result<Option<K::Value>> {
        Ok(self.get_with_version(key)?.map(Versioned::into_value))
    }

    /// Read a typed value with its version
    fn get_with_version<K: TableKey>(&self, key: &K) -> Result<Option<Versioned<K::Value>>> {
        let erased: RecordKey = key.clone().into();
        downcast::<K>(self.get_entry_with_version(&erased)?)
    }

    /// Read several keys of one type in one consistent snapshot
    fn get_many<K: TableKey>(&self, keys: &[K]) -> Result<Vec<Option<Versioned<K::Value>>>> {
        let erased: Vec<RecordKey> = keys.iter().cloned().map(Into::into).collect();
        self.get_entries_with_version(&erased)?
            .into_iter()
            .map(downcast::<K>)
            .collect()
    }

    /// Typed create-if-absent
    fn add<K: TableKey>(&self, key: K, value: K::Value) -> Result<bool> {
        self.add_entry(key.into(), value.into())
    }

    /// Typed conditional write
    fn update<K: TableKey>(&self, key: K, value: K::Value, expected: Option<Version>) -> Result<Version> {
        self.update_entry(key.into(), value.into(), expected)
    }
}

impl<T: VersionedTable + ?Sized> TableExt for T {}

/// Typed builder for an atomic multi-key write
#[derive(Debug, Default)]
pub struct WriteBatch {
    entries: Vec<TableEntry>,
}

impl WriteBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` under `key` if the key currently has version `expected`
    pub fn put<K: TableKey>(&mut self, key: K, value: K::Value, expected: Option<Version>) -> &mut Self {
        self.entries.push(TableEntry::new(key, value, expected));
        self
    }

    /// Write `value` under `key`, which must not exist yet
    pub fn create<K: TableKey>(&mut self, key: K, value: K::Value) -> &mut Self {
        self.put(key, value, None)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submit the batch to `table`
    pub fn commit<T: VersionedTable + ?Sized>(self, table: &T) -> Result<Vec<Version>> {
        table.update_entries(self.entries)
    }

    /// The erased entries
    pub fn into_entries(self) -> Vec<TableEntry> {
        self.entries
    }
}
