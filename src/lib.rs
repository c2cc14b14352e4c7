//! Schemata - group metadata and versioning engine for a schema registry
//!
//! Schemata records, per named group, the ordered history of schemas used by
//! producers, assigns each a small integer version, and binds every
//! (schema version, codec) pair to a compact encoding id carried in a 5-byte
//! message header.
//!
//! # Quick Start
//!
//! ```ignore
//! use schemata::{CodecType, GroupProperties, RegistryConfig, SchemaInfo, SchemaRegistry, SerializationFormat};
//!
//! let registry = SchemaRegistry::open(&RegistryConfig::default())?;
//! registry.create_group("orders", &GroupProperties::new(SerializationFormat::Avro))?;
//!
//! let schema = SchemaInfo::new("Order", SerializationFormat::Avro, avro_bytes);
//! let version = registry.add_schema("orders", &schema)?;
//! let id = registry.get_encoding_id("orders", &version, &CodecType::none())?;
//! let message = schemata::header::encode_message(id, &payload)?;
//! ```
//!
//! # Architecture
//!
//! - `schemata-core`: errors, versions and etags, domain types, the record model
//! - `schemata-durability`: WAL framing, logs and versioned key-value stores
//! - `schemata-storage`: the versioned table contract and its three drivers
//! - `schemata-engine`: groups, the directory, the registry facade, the encoding cache

pub use schemata_core::{
    fingerprint, header, CodecType, Compatibility, EncodingId, EncodingInfo, Error, Etag,
    GroupHistoryRecord, GroupProperties, Result, SchemaInfo, SchemaWithVersion,
    SerializationFormat, Version, VersionInfo,
};
pub use schemata_engine::*;
pub use schemata_storage::{
    LogLocation, LogTableProvider, MemoryTableProvider, StoreTableProvider, TableProvider,
    VersionedTable,
};
