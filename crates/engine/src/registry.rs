//! Registry facade
//!
//! [`SchemaRegistry`] is the method surface a service layer calls: it
//! resolves group names through the [`GroupsDirectory`], performs format and
//! compatibility checks before writes, and runs the encoding-id
//! get-or-create loop. Everything else is a thin pass-through to [`Group`].

use crate::config::{Backend, RegistryConfig};
use crate::group::{EncodingIdLookup, Group};
use crate::groups::GroupsDirectory;
use crate::retry::RetryConfig;
use schemata_core::error::{Error, Result};
use schemata_core::{
    CheckDirection, CheckScope, CodecType, Compatibility, EncodingId, EncodingInfo, GroupHistoryRecord, GroupProperties,
    SchemaInfo, SchemaWithVersion, VersionInfo,
};
use schemata_durability::store::{FileStore, MemoryStore};
use schemata_storage::provider::{
    LogLocation, LogTableProvider, MemoryTableProvider, StoreTableProvider, TableProvider,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Format-specific compatibility predicate
///
/// The registry decides which existing schemas a candidate is checked
/// against and in which direction; the checker only compares two schemas.
pub trait CompatibilityChecker: Send + Sync {
    /// Whether `candidate` is compatible with `existing` in `direction`
    fn is_compatible(
        &self,
        direction: CheckDirection,
        candidate: &SchemaInfo,
        existing: &SchemaInfo,
    ) -> bool;
}

/// Checker that accepts every pair
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CompatibilityChecker for AcceptAll {
    fn is_compatible(&self, _: CheckDirection, _: &SchemaInfo, _: &SchemaInfo) -> bool {
        true
    }
}

/// One pairwise check a candidate must pass
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityCheck {
    /// Direction of the check
    pub direction: CheckDirection,
    /// Existing schema to check against
    pub existing: SchemaWithVersion,
}

/// Checks a candidate must pass under `policy`, or `None` if the policy
/// rejects it outright
///
/// `existing` is in ordinal order. Each direction of the policy selects the
/// latest schema, all of them, or those from a given ordinal onwards.
pub fn schemas_to_check(
    policy: &Compatibility,
    existing: &[SchemaWithVersion],
) -> Option<Vec<CompatibilityCheck>> {
    if *policy == Compatibility::DenyAll && !existing.is_empty() {
        return None;
    }
    let mut checks = Vec::new();
    for direction in [CheckDirection::Backward, CheckDirection::Forward] {
        let selected: Vec<&SchemaWithVersion> = match policy.scope(direction) {
            None => Vec::new(),
            Some(CheckScope::Latest) => existing.last().into_iter().collect(),
            Some(CheckScope::All) => existing.iter().collect(),
            Some(CheckScope::FromOrdinal(till)) => existing
                .iter()
                .filter(|s| s.version_info.ordinal >= till)
                .collect(),
        };
        checks.extend(selected.into_iter().map(|s| CompatibilityCheck {
            direction,
            existing: s.clone(),
        }));
    }
    Some(checks)
}

/// Schema registry over a groups directory
pub struct SchemaRegistry {
    groups: GroupsDirectory,
    checker: Arc<dyn CompatibilityChecker>,
    encoding_retry: RetryConfig,
}

impl SchemaRegistry {
    /// Registry over `provider`, accepting every compatibility check
    pub fn new(provider: Arc<dyn TableProvider>) -> Result<Self> {
        Ok(SchemaRegistry {
            groups: GroupsDirectory::new(provider)?,
            checker: Arc::new(AcceptAll),
            encoding_retry: RetryConfig::default(),
        })
    }

    /// Registry over the backend described by `config`
    pub fn open(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        let durability_mode = config.durability_mode()?;

        let provider: Arc<dyn TableProvider> = match (config.backend, &config.data_dir) {
            (Backend::Memory, _) => Arc::new(MemoryTableProvider::new()),
            (Backend::Table, None) => Arc::new(StoreTableProvider::new(Arc::new(MemoryStore::new()))),
            (Backend::Table, Some(dir)) => Arc::new(StoreTableProvider::new(Arc::new(
                FileStore::open(dir, durability_mode)?,
            ))),
            (Backend::Log, None) => Arc::new(LogTableProvider::new(LogLocation::Memory)),
            (Backend::Log, Some(dir)) => {
                std::fs::create_dir_all(dir)?;
                Arc::new(LogTableProvider::new(LogLocation::Directory {
                    path: dir.clone(),
                    durability_mode,
                }))
            }
        };
        info!(backend = ?config.backend, data_dir = ?config.data_dir, "Opening schema registry");

        let groups = GroupsDirectory::new(provider)?.with_codec_retry(config.codec_retry.clone());
        Ok(SchemaRegistry {
            groups,
            checker: Arc::new(AcceptAll),
            encoding_retry: config.encoding_retry.clone(),
        })
    }

    /// Builder: compatibility checker
    pub fn with_checker(mut self, checker: Arc<dyn CompatibilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Builder: retry policy of [`SchemaRegistry::get_encoding_id`]
    pub fn with_encoding_retry(mut self, retry: RetryConfig) -> Self {
        self.encoding_retry = retry;
        self
    }

    /// The underlying directory
    pub fn groups(&self) -> &GroupsDirectory {
        &self.groups
    }

    /// Open an active group
    pub fn group(&self, name: &str) -> Result<Group> {
        self.groups.get_group(name)
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Create a group; `false` if it already exists
    pub fn create_group(&self, name: &str, properties: &GroupProperties) -> Result<bool> {
        self.groups.add_new_group(name, properties)
    }

    /// Delete a group; no-op if it does not exist
    pub fn delete_group(&self, name: &str) -> Result<()> {
        self.groups.delete_group(name)
    }

    /// Names of active groups, sorted
    pub fn list_groups(&self) -> Result<Vec<String>> {
        self.groups.list_groups()
    }

    /// Properties of a group, with its current policy
    pub fn get_group_properties(&self, name: &str) -> Result<GroupProperties> {
        self.group(name)?.get_group_properties()
    }

    /// Replace the group's compatibility policy
    pub fn update_compatibility(&self, name: &str, compatibility: &Compatibility) -> Result<()> {
        let group = self.group(name)?;
        let etag = group.current_etag()?;
        group.update_validation_policy(compatibility, &etag)
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Add a schema unless it is already present
    ///
    /// # Errors
    ///
    /// - `InvalidSchema` if the schema's format does not match the group's
    /// - `IncompatibleSchema` if the compatibility check fails
    /// - `WriteConflict` if the group changed during the call; not retried
    pub fn add_schema(&self, name: &str, schema: &SchemaInfo) -> Result<VersionInfo> {
        let group = self.group(name)?;
        // Etag first: a policy change after this read fails the final write
        let etag = group.current_etag()?;
        let properties = group.get_group_properties()?;
        check_format(name, &properties, schema)?;

        match group.get_version(schema) {
            Ok(existing) => {
                debug!(group = name, version = %existing, "Schema already registered");
                return Ok(existing);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if !self.is_compatible(&group, &properties, schema)? {
            return Err(Error::IncompatibleSchema(format!(
                "{} is not {:?} compatible in group {}",
                schema.object_type, properties.compatibility, name
            )));
        }
        group.add_schema(schema, &properties, &etag)
    }

    /// Whether `schema` would pass the format and compatibility checks
    pub fn validate_schema(&self, name: &str, schema: &SchemaInfo) -> Result<bool> {
        let group = self.group(name)?;
        let properties = group.get_group_properties()?;
        if check_format(name, &properties, schema).is_err() {
            return Ok(false);
        }
        self.is_compatible(&group, &properties, schema)
    }

    /// Coordinates of a registered schema
    pub fn get_schema_version(&self, name: &str, schema: &SchemaInfo) -> Result<VersionInfo> {
        self.group(name)?.get_version(schema)
    }

    /// Schema at the given coordinates
    pub fn get_schema(&self, name: &str, version_info: &VersionInfo) -> Result<SchemaInfo> {
        self.group(name)?.get_schema(version_info)
    }

    /// Most recent live schema, optionally of one object type
    pub fn get_latest_schema(
        &self,
        name: &str,
        object_type: Option<&str>,
    ) -> Result<Option<SchemaWithVersion>> {
        self.group(name)?.get_latest_schema(object_type)
    }

    /// Live schemas in ordinal order
    pub fn get_schemas(&self, name: &str, object_type: Option<&str>) -> Result<Vec<SchemaWithVersion>> {
        self.group(name)?.get_schemas(object_type)
    }

    /// Full history, deleted schemas included
    pub fn get_history(&self, name: &str, object_type: Option<&str>) -> Result<Vec<GroupHistoryRecord>> {
        self.group(name)?.get_history(object_type)
    }

    /// Logically delete a schema
    pub fn delete_schema(&self, name: &str, version_info: &VersionInfo) -> Result<()> {
        let group = self.group(name)?;
        let etag = group.current_etag()?;
        group.delete_schema(version_info, &etag)
    }

    // ========================================================================
    // Codecs and encoding ids
    // ========================================================================

    /// Register a codec with a group
    pub fn add_codec_type(&self, name: &str, codec_type: &CodecType) -> Result<()> {
        self.group(name)?.add_codec(codec_type)
    }

    /// Codecs registered with a group
    pub fn get_codec_types(&self, name: &str) -> Result<Vec<CodecType>> {
        self.group(name)?.get_codec_types()
    }

    /// Encoding id of (version, codec), allocating one if needed
    ///
    /// Racing callers for one pair all receive the same id.
    pub fn get_encoding_id(
        &self,
        name: &str,
        version_info: &VersionInfo,
        codec_type: &CodecType,
    ) -> Result<EncodingId> {
        let group = self.group(name)?;
        self.encoding_retry.run("get_encoding_id", || {
            match group.get_encoding_id(version_info, codec_type)? {
                EncodingIdLookup::Found(id) => Ok(id),
                EncodingIdLookup::Absent(etag) => {
                    group.create_encoding_id(version_info, codec_type, &etag)
                }
            }
        })
    }

    /// Writer schema and codec of an encoding id
    pub fn get_encoding_info(&self, name: &str, encoding_id: EncodingId) -> Result<EncodingInfo> {
        self.group(name)?.get_encoding_info(encoding_id)
    }

    fn is_compatible(
        &self,
        group: &Group,
        properties: &GroupProperties,
        schema: &SchemaInfo,
    ) -> Result<bool> {
        let scope = if properties.validate_by_object_type {
            Some(schema.object_type.as_str())
        } else {
            None
        };
        let existing = group.get_schemas(scope)?;
        Ok(match schemas_to_check(&properties.compatibility, &existing) {
            None => false,
            Some(checks) => checks.iter().all(|check| {
                self.checker
                    .is_compatible(check.direction, schema, &check.existing.schema_info)
            }),
        })
    }
}

fn check_format(name: &str, properties: &GroupProperties, schema: &SchemaInfo) -> Result<()> {
    if properties
        .serialization_format
        .accepts(&schema.serialization_format)
    {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!(
            "{} schema {} in {} group {}",
            schema.serialization_format, schema.object_type, properties.serialization_format, name
        )))
    }
}
