//! Core types for the schemata registry engine
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy
//! - Version, Versioned<T>, Etag: optimistic concurrency tokens
//! - Domain types: GroupProperties, SchemaInfo, VersionInfo, CodecType, EncodingId
//! - Records: the closed set of typed key/value pairs a table may hold
//! - Fingerprint: content hash used for schema deduplication
//! - Header: the 5-byte per-message wire header

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fingerprint;
pub mod header;
pub mod records;
pub mod types;
pub mod version;

pub use error::{Error, Result};
pub use fingerprint::{fingerprint, FingerprintFn};
pub use records::{RecordKey, RecordValue, TableKey};
pub use types::{
    CheckDirection, CheckScope, CodecType, Compatibility, EncodingId, EncodingInfo, GroupHistoryRecord, GroupProperties,
    Properties, SchemaInfo, SchemaWithVersion, SerializationFormat, VersionInfo,
};
pub use version::{Etag, Version, Versioned};
