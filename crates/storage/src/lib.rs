//! Table layer for the schemata registry
//!
//! This crate implements the versioned table contract and its drivers:
//! - VersionedTable: object-safe optimistic key-value table over the record model
//! - TableExt / WriteBatch: typed reads and atomic multi-key writes
//! - InMemoryTable: mutex-guarded map, for tests and embedded use
//! - PersistedTable: tables in an external versioned key-value store, with an
//!   immutable-record cache
//! - LogTable: a conditionally appended log plus a replayed index
//! - TableProvider: per-driver factories used by the groups directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod log_table;
pub mod memory;
pub mod persisted;
pub mod provider;
pub mod table;

pub use log_table::LogTable;
pub use memory::InMemoryTable;
pub use persisted::{ImmutableCache, PersistedTable, DEFAULT_CACHE_CAPACITY};
pub use provider::{
    LogLocation, LogTableProvider, MemoryTableProvider, StoreTableProvider, TableProvider,
    DIRECTORY_TABLE,
};
pub use table::{TableEntry, TableExt, VersionedTable, VersionedValue, WriteBatch};
