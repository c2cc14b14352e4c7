//! Group metadata and versioning engine
//!
//! This crate holds the registry's domain logic on top of the table layer:
//! - Group: version assignment, fingerprint dedup, encoding ids, codecs, policy
//! - GroupsDirectory: named groups and their Creating/Active/Deleting lifecycle
//! - SchemaRegistry: format and compatibility checks, encoding-id get-or-create
//! - EncodingCache: client-side read-through cache of encoding-id bindings
//! - RegistryConfig / RetryConfig: backend selection and retry policies
//!
//! The engine never knows which table driver backs a group; it only sees
//! `Arc<dyn VersionedTable>` handed out by a `TableProvider`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod group;
pub mod groups;
pub mod registry;
pub mod retry;

pub use cache::{EncodingCache, EncodingResolver, RegistryResolver};
pub use config::{Backend, ConfigError, RegistryConfig, CONFIG_FILE_NAME};
pub use group::{EncodingIdLookup, Group};
pub use groups::{group_table_name, GroupsDirectory};
pub use registry::{
    schemas_to_check, AcceptAll, CompatibilityCheck, CompatibilityChecker, SchemaRegistry,
};
pub use retry::RetryConfig;
