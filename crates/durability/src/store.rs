//! Versioned key-value store
//!
//! The primitive persisted tables are built on: named tables of byte keys,
//! each value carrying a per-key version, with conditional batch writes that
//! either apply entirely or not at all.
//!
//! Two implementations share one state machine:
//! - [`MemoryStore`]: state only
//! - [`FileStore`]: state plus a WAL; every accepted mutation is logged before
//!   it is applied, and replayed on open
//!
//! Versions are `Version::Counter` values drawn from one store-wide sequence,
//! so a key removed and written again never sees a version it had before.
//! Replay reproduces them exactly because they only depend on the order of
//! mutations.

use crate::encoding::TYPE_STORE_OP;
use crate::wal::{DurabilityMode, WalFile};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use schemata_core::error::{Error, Result};
use schemata_core::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// A stored value and its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    /// Value bytes
    pub value: Vec<u8>,
    /// Version of the value
    pub version: Version,
}

/// One element of a conditional batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    /// Key bytes
    pub key: Vec<u8>,
    /// New value bytes
    pub value: Vec<u8>,
    /// Version the key must currently have; `None` means the key must be absent
    pub expected: Option<Version>,
}

/// External versioned key-value store
pub trait VersionedStore: Send + Sync {
    /// Create a table; no-op if it exists
    fn create_table(&self, table: &str) -> Result<()>;

    /// Drop a table and everything in it; no-op if it does not exist
    fn delete_table(&self, table: &str) -> Result<()>;

    /// Whether a table exists
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Insert `key` unless present; returns the new version, or `None` if the key existed
    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<Option<Version>>;

    /// Apply every write or none
    ///
    /// # Errors
    ///
    /// - `WriteConflict` if any write's expectation does not hold
    /// - `NotFound` if the table does not exist
    fn put_all(&self, table: &str, writes: Vec<StoreWrite>) -> Result<Vec<Version>>;

    /// Read several keys in one consistent snapshot
    fn get_all(&self, table: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<StoreRecord>>>;

    /// Every key/value pair of the table
    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, StoreRecord)>>;

    /// Remove `key` if it has version `expected` (or unconditionally when `None`)
    ///
    /// Removing an absent key is a no-op.
    fn remove(&self, table: &str, key: &[u8], expected: Option<Version>) -> Result<()>;
}

// ============================================================================
// Shared state machine
// ============================================================================

/// Logged mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoreOp {
    CreateTable { table: String },
    DeleteTable { table: String },
    Put { table: String, entries: Vec<(Vec<u8>, Vec<u8>)> },
    Remove { table: String, key: Vec<u8> },
}

type Table = FxHashMap<Vec<u8>, StoreRecord>;

#[derive(Default)]
struct StoreState {
    tables: FxHashMap<String, Table>,
    last_version: u64,
}

impl StoreState {
    fn table(&self, table: &str) -> Result<&Table> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {}", table)))
    }

    /// Check a mutation against current state; `Ok(None)` means it is a no-op
    fn validate(&self, op: StoreOp, expectations: &[Option<Version>]) -> Result<Option<StoreOp>> {
        match &op {
            StoreOp::CreateTable { table } => {
                Ok((!self.tables.contains_key(table)).then_some(op))
            }
            StoreOp::DeleteTable { table } => Ok(self.tables.contains_key(table).then_some(op)),
            StoreOp::Put { table, entries } => {
                let current = self.table(table)?;
                for ((key, _), expected) in entries.iter().zip(expectations) {
                    let actual = current.get(key).map(|r| r.version);
                    if actual != *expected {
                        return Err(Error::WriteConflict(format!(
                            "table {}: expected {:?}, found {:?}",
                            table, expected, actual
                        )));
                    }
                }
                Ok(Some(op))
            }
            StoreOp::Remove { table, key } => {
                let current = self.table(table)?;
                match (current.get(key), expectations.first().copied().flatten()) {
                    (None, _) => Ok(None),
                    (Some(r), Some(expected)) if r.version != expected => {
                        Err(Error::WriteConflict(format!(
                            "table {}: expected {}, found {}",
                            table, expected, r.version
                        )))
                    }
                    _ => Ok(Some(op)),
                }
            }
        }
    }

    /// Apply a validated mutation; returns the versions of written keys
    fn apply(&mut self, op: StoreOp) -> Vec<Version> {
        match op {
            StoreOp::CreateTable { table } => {
                self.tables.entry(table).or_default();
                Vec::new()
            }
            StoreOp::DeleteTable { table } => {
                self.tables.remove(&table);
                Vec::new()
            }
            StoreOp::Put { table, entries } => {
                let current = self.tables.entry(table).or_default();
                let last_version = &mut self.last_version;
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        *last_version += 1;
                        let version = Version::counter(*last_version);
                        current.insert(key, StoreRecord { value, version });
                        version
                    })
                    .collect()
            }
            StoreOp::Remove { table, key } => {
                if let Some(current) = self.tables.get_mut(&table) {
                    current.remove(&key);
                }
                Vec::new()
            }
        }
    }

    fn get_all(&self, table: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<StoreRecord>>> {
        let current = self.table(table)?;
        Ok(keys.iter().map(|k| current.get(k).cloned()).collect())
    }

    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, StoreRecord)>> {
        let current = self.table(table)?;
        Ok(current
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }
}

fn put_op(table: &str, writes: Vec<StoreWrite>) -> Result<(StoreOp, Vec<Option<Version>>)> {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut entries = Vec::with_capacity(writes.len());
    let mut expectations = Vec::with_capacity(writes.len());
    for write in writes {
        if !seen.insert(write.key.clone()) {
            return Err(Error::InvalidOperation(format!(
                "table {}: key written twice in one batch",
                table
            )));
        }
        entries.push((write.key, write.value));
        expectations.push(write.expected);
    }
    Ok((
        StoreOp::Put {
            table: table.to_string(),
            entries,
        },
        expectations,
    ))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn execute(&self, op: StoreOp, expectations: &[Option<Version>]) -> Result<Vec<Version>> {
        let mut state = self.state.write();
        match state.validate(op, expectations)? {
            Some(op) => Ok(state.apply(op)),
            None => Ok(Vec::new()),
        }
    }
}

impl VersionedStore for MemoryStore {
    fn create_table(&self, table: &str) -> Result<()> {
        self.execute(StoreOp::CreateTable { table: table.to_string() }, &[])?;
        Ok(())
    }

    fn delete_table(&self, table: &str) -> Result<()> {
        self.execute(StoreOp::DeleteTable { table: table.to_string() }, &[])?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.state.read().tables.contains_key(table))
    }

    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<Option<Version>> {
        let write = StoreWrite {
            key: key.to_vec(),
            value: value.to_vec(),
            expected: None,
        };
        match self.put_all(table, vec![write]) {
            Ok(versions) => Ok(versions.first().copied()),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put_all(&self, table: &str, writes: Vec<StoreWrite>) -> Result<Vec<Version>> {
        let (op, expectations) = put_op(table, writes)?;
        self.execute(op, &expectations)
    }

    fn get_all(&self, table: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<StoreRecord>>> {
        self.state.read().get_all(table, keys)
    }

    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, StoreRecord)>> {
        self.state.read().scan(table)
    }

    fn remove(&self, table: &str, key: &[u8], expected: Option<Version>) -> Result<()> {
        let op = StoreOp::Remove {
            table: table.to_string(),
            key: key.to_vec(),
        };
        self.execute(op, &[expected])?;
        Ok(())
    }
}

// ============================================================================
// File-backed store
// ============================================================================

struct FileStoreInner {
    state: StoreState,
    wal: WalFile,
}

/// Store persisted to a single WAL file under a data directory
pub struct FileStore {
    dir: PathBuf,
    inner: Mutex<FileStoreInner>,
}

/// File name of the store's WAL within its directory
pub const STORE_WAL_FILE: &str = "store.wal";

impl FileStore {
    /// Open (or create) the store rooted at `dir`, replaying its WAL
    pub fn open<P: AsRef<Path>>(dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (wal, entries) = WalFile::open(dir.join(STORE_WAL_FILE), durability_mode)?;

        let mut state = StoreState::default();
        let mut replayed = 0usize;
        for entry in entries {
            if entry.entry_type != TYPE_STORE_OP {
                continue;
            }
            match bincode::deserialize::<StoreOp>(&entry.payload) {
                Ok(op) => {
                    state.apply(op);
                    replayed += 1;
                }
                Err(e) => {
                    error!(offset = entry.offset, error = %e, "Undecodable store operation");
                    return Err(Error::Corruption(format!(
                        "offset {}: undecodable store operation: {}",
                        entry.offset, e
                    )));
                }
            }
        }

        info!(
            dir = %dir.display(),
            operations = replayed,
            tables = state.tables.len(),
            "Recovered store"
        );

        Ok(FileStore {
            dir,
            inner: Mutex::new(FileStoreInner { state, wal }),
        })
    }

    /// Directory the store lives in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn execute(&self, op: StoreOp, expectations: &[Option<Version>]) -> Result<Vec<Version>> {
        let mut inner = self.inner.lock();
        match inner.state.validate(op, expectations)? {
            Some(op) => {
                let payload = bincode::serialize(&op)?;
                inner.wal.append(TYPE_STORE_OP, &payload)?;
                debug!(bytes = payload.len(), "Logged store operation");
                Ok(inner.state.apply(op))
            }
            None => Ok(Vec::new()),
        }
    }
}

impl VersionedStore for FileStore {
    fn create_table(&self, table: &str) -> Result<()> {
        self.execute(StoreOp::CreateTable { table: table.to_string() }, &[])?;
        Ok(())
    }

    fn delete_table(&self, table: &str) -> Result<()> {
        self.execute(StoreOp::DeleteTable { table: table.to_string() }, &[])?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.lock().state.tables.contains_key(table))
    }

    fn put_if_absent(&self, table: &str, key: &[u8], value: &[u8]) -> Result<Option<Version>> {
        let write = StoreWrite {
            key: key.to_vec(),
            value: value.to_vec(),
            expected: None,
        };
        match self.put_all(table, vec![write]) {
            Ok(versions) => Ok(versions.first().copied()),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put_all(&self, table: &str, writes: Vec<StoreWrite>) -> Result<Vec<Version>> {
        let (op, expectations) = put_op(table, writes)?;
        self.execute(op, &expectations)
    }

    fn get_all(&self, table: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<StoreRecord>>> {
        self.inner.lock().state.get_all(table, keys)
    }

    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, StoreRecord)>> {
        self.inner.lock().state.scan(table)
    }

    fn remove(&self, table: &str, key: &[u8], expected: Option<Version>) -> Result<()> {
        let op = StoreOp::Remove {
            table: table.to_string(),
            key: key.to_vec(),
        };
        self.execute(op, &[expected])?;
        Ok(())
    }
}
