//! Table factories
//!
//! A [`TableProvider`] creates, opens and destroys named tables of one
//! driver kind. The groups directory asks it for one table per group plus
//! the directory table itself, and never learns which driver it got.

use crate::log_table::LogTable;
use crate::memory::InMemoryTable;
use crate::persisted::{ImmutableCache, PersistedTable};
use crate::table::VersionedTable;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use schemata_core::error::{Error, Result};
use schemata_durability::log::{FileLog, Log, MemoryLog};
use schemata_durability::store::VersionedStore;
use schemata_durability::wal::DurabilityMode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Name of the table holding the groups directory
pub const DIRECTORY_TABLE: &str = "_groups";

/// Creates, opens and destroys named tables
pub trait TableProvider: Send + Sync {
    /// The groups directory table, created on first use
    fn directory(&self) -> Result<Arc<dyn VersionedTable>> {
        self.create_table(DIRECTORY_TABLE)
    }

    /// Create a table, or open it if it already exists
    fn create_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>>;

    /// Open an existing table
    ///
    /// # Errors
    ///
    /// - `NotFound` if the table does not exist
    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>>;

    /// Destroy a table and its contents; no-op if it does not exist
    fn delete_table(&self, name: &str) -> Result<()>;
}

/// Reject names that cannot safely become file names
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidOperation(format!("invalid table name {:?}", name)))
    }
}

// ============================================================================
// In-memory tables
// ============================================================================

/// Provider of [`InMemoryTable`]s
#[derive(Default)]
pub struct MemoryTableProvider {
    tables: DashMap<String, Arc<InMemoryTable>>,
}

impl MemoryTableProvider {
    /// Provider with no tables
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableProvider for MemoryTableProvider {
    fn create_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        validate_table_name(name)?;
        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryTable::new(name)))
            .clone();
        Ok(table)
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        match self.tables.get(name) {
            Some(table) => Ok(table.clone() as Arc<dyn VersionedTable>),
            None => Err(Error::NotFound(format!("table {}", name))),
        }
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        self.tables.remove(name);
        Ok(())
    }
}

// ============================================================================
// Store-backed tables
// ============================================================================

/// Provider of [`PersistedTable`]s over one shared store
pub struct StoreTableProvider<S: VersionedStore> {
    store: Arc<S>,
    cache: Arc<ImmutableCache>,
}

impl<S: VersionedStore + 'static> StoreTableProvider<S> {
    /// Provider over `store` with a fresh immutable-record cache
    pub fn new(store: Arc<S>) -> Self {
        StoreTableProvider {
            store,
            cache: Arc::new(ImmutableCache::new()),
        }
    }

    /// The cache shared by every table of this provider
    pub fn cache(&self) -> &Arc<ImmutableCache> {
        &self.cache
    }

    fn table(&self, name: &str) -> Arc<dyn VersionedTable> {
        Arc::new(PersistedTable::new(
            name,
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
        ))
    }
}

impl<S: VersionedStore + 'static> TableProvider for StoreTableProvider<S> {
    fn create_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        validate_table_name(name)?;
        self.store.create_table(name)?;
        Ok(self.table(name))
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        if !self.store.table_exists(name)? {
            return Err(Error::NotFound(format!("table {}", name)));
        }
        Ok(self.table(name))
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        self.store.delete_table(name)?;
        self.cache.evict_table(name);
        Ok(())
    }
}

// ============================================================================
// Log-backed tables
// ============================================================================

/// Where log-backed tables keep their logs
#[derive(Debug, Clone)]
pub enum LogLocation {
    /// Logs live in memory
    Memory,
    /// One `<table>.log` file per table under a directory
    Directory {
        /// Data directory
        path: PathBuf,
        /// fsync policy of every log file
        durability_mode: DurabilityMode,
    },
}

/// Provider of [`LogTable`]s, one log per table
pub struct LogTableProvider {
    location: LogLocation,
    tables: Mutex<FxHashMap<String, Arc<LogTable>>>,
}

impl LogTableProvider {
    /// Provider keeping logs at `location`
    pub fn new(location: LogLocation) -> Self {
        LogTableProvider {
            location,
            tables: Mutex::new(FxHashMap::default()),
        }
    }

    fn log_path(&self, name: &str) -> Option<PathBuf> {
        match &self.location {
            LogLocation::Memory => None,
            LogLocation::Directory { path, .. } => Some(path.join(format!("{}.log", name))),
        }
    }

    fn open_log(&self, name: &str) -> Result<Arc<dyn Log>> {
        match &self.location {
            LogLocation::Memory => Ok(Arc::new(MemoryLog::new())),
            LogLocation::Directory {
                path,
                durability_mode,
            } => Ok(Arc::new(FileLog::open(
                path.join(format!("{}.log", name)),
                *durability_mode,
            )?)),
        }
    }
}

impl TableProvider for LogTableProvider {
    fn create_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        validate_table_name(name)?;
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table) as Arc<dyn VersionedTable>);
        }
        let table = Arc::new(LogTable::new(name, self.open_log(name)?));
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        let exists_on_disk = match self.log_path(name) {
            Some(path) => path.exists(),
            None => false,
        };
        if !exists_on_disk && !self.tables.lock().contains_key(name) {
            return Err(Error::NotFound(format!("table {}", name)));
        }
        self.create_table(name)
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        self.tables.lock().remove(name);
        if let Some(path) = self.log_path(name) {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "Removed table log"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
