//! Durability layer for the schemata registry
//!
//! This crate provides the storage primitives tables are built on:
//! - Encoding: CRC32-framed entries
//! - WAL: append-only file with configurable durability modes
//! - Log: position-addressed log with conditional appends (memory and file)
//! - Store: versioned key-value store with conditional batch writes (memory and file)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod log;
pub mod store;
pub mod wal;

pub use log::{FileLog, Log, LogPosition, MemoryLog};
pub use store::{FileStore, MemoryStore, StoreRecord, StoreWrite, VersionedStore};
pub use wal::{DurabilityMode, WalFile, WalRecord};
