//! Group domain logic
//!
//! A [`Group`] owns one versioned table and implements everything the
//! registry does within a group: version assignment, fingerprint dedup,
//! encoding-id allocation, codec-list maintenance, policy updates and history.
//!
//! ## Concurrency
//!
//! Every structural change is one atomic batch conditioned on the group's
//! etag (the version of the sentinel record) and rewrites the sentinel, so
//! structural changes are totally ordered. A batch built from stale reads
//! fails with `WriteConflict` and is never retried here: the caller re-reads
//! the etag and decides. The one exception is [`Group::add_codec`], which
//! does not touch the etag and retries its read-modify-write internally.

use crate::retry::RetryConfig;
use schemata_core::error::{Error, Result};
use schemata_core::fingerprint::{fingerprint, FingerprintFn};
use schemata_core::records::{
    CodecTypesKey, CodecTypesRecord, EncodingBindingRecord, EncodingIdKey, EncodingIdRecord,
    EncodingInfoKey, EtagKey, EtagRecord, FingerprintKey, GroupPropertiesKey,
    GroupPropertiesRecord, LatestEncodingIdKey, LatestEncodingIdRecord, LatestSchemaKey,
    LatestSchemaRecord, LatestTypeSchemaKey, LatestTypeSchemaRecord, ObjectTypesKey,
    SchemaDeletedKey, SchemaDeletedRecord, SchemaKey, SchemaRecord,
    TypeVersionKey, TypeVersionRecord, ValidationPolicyKey, ValidationPolicyRecord,
};
use schemata_core::types::now_millis;
use schemata_core::{
    CodecType, Compatibility, EncodingId, EncodingInfo, Etag, GroupHistoryRecord,
    GroupProperties, RecordKey, SchemaInfo, SchemaWithVersion, Version, VersionInfo,
};
use schemata_storage::table::{downcast, TableExt, VersionedTable, WriteBatch};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of looking up the encoding id of a (version, codec) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingIdLookup {
    /// The pair is bound to this id
    Found(EncodingId),
    /// No binding yet; the etag observed in the same snapshot, for a follow-up create
    Absent(Etag),
}

/// A schema slot as read back for listings
struct Slot {
    record: SchemaRecord,
    deleted: bool,
}

/// One named group backed by one table
#[derive(Clone)]
pub struct Group {
    name: String,
    table: Arc<dyn VersionedTable>,
    fingerprint: FingerprintFn,
    codec_retry: RetryConfig,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("table", &self.table.name())
            .finish()
    }
}

impl Group {
    /// Group over `table`, with xxh3 fingerprints and unbounded codec retries
    pub fn new(name: impl Into<String>, table: Arc<dyn VersionedTable>) -> Self {
        Group {
            name: name.into(),
            table,
            fingerprint,
            codec_retry: RetryConfig::unbounded(),
        }
    }

    /// Builder: replace the fingerprint function
    pub fn with_fingerprint(mut self, fingerprint: FingerprintFn) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Builder: retry policy of [`Group::add_codec`]
    pub fn with_codec_retry(mut self, codec_retry: RetryConfig) -> Self {
        self.codec_retry = codec_retry;
        self
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table
    pub fn table(&self) -> &Arc<dyn VersionedTable> {
        &self.table
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the group's records; safe to call again
    ///
    /// The sentinel is written last, so an absent etag means creation never finished.
    pub fn create(&self, properties: &GroupProperties) -> Result<()> {
        self.table.add(
            GroupPropertiesKey,
            GroupPropertiesRecord {
                serialization_format: properties.serialization_format.clone(),
                validate_by_object_type: properties.validate_by_object_type,
                properties: properties.properties.clone(),
            },
        )?;
        self.table.add(
            ValidationPolicyKey,
            ValidationPolicyRecord {
                compatibility: properties.compatibility.clone(),
            },
        )?;
        self.table.add(
            CodecTypesKey,
            CodecTypesRecord {
                codec_types: vec![CodecType::none()],
            },
        )?;
        let created = self.table.add(EtagKey, EtagRecord)?;
        if created {
            info!(group = %self.name, format = %properties.serialization_format, "Created group");
        }
        Ok(())
    }

    /// Current etag; absent before [`Group::create`] completes
    pub fn current_etag(&self) -> Result<Etag> {
        let version = self.table.get_with_version(&EtagKey)?.map(|v| v.version);
        Ok(self.table.to_etag(version))
    }

    /// Properties with the current compatibility policy
    pub fn get_group_properties(&self) -> Result<GroupProperties> {
        let keys: [RecordKey; 2] = [GroupPropertiesKey.into(), ValidationPolicyKey.into()];
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();
        let properties = downcast::<GroupPropertiesKey>(read.next().flatten())?
            .ok_or_else(|| self.not_found("properties"))?
            .into_value();
        let policy = downcast::<ValidationPolicyKey>(read.next().flatten())?
            .ok_or_else(|| self.not_found("validation policy"))?
            .into_value();

        Ok(GroupProperties {
            serialization_format: properties.serialization_format,
            compatibility: policy.compatibility,
            validate_by_object_type: properties.validate_by_object_type,
            properties: properties.properties,
        })
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Coordinates of a schema already in the group
    ///
    /// Fingerprint candidates are compared by name and exact bytes, so a hash
    /// collision never returns the wrong schema. Deleted schemas do not match.
    pub fn get_version(&self, schema: &SchemaInfo) -> Result<VersionInfo> {
        let fingerprint = (self.fingerprint)(&schema.schema);
        let candidates = self
            .table
            .get(&FingerprintKey { fingerprint })?
            .ok_or_else(|| self.not_found(&format!("schema {}", schema.object_type)))?;

        let ordinals: Vec<i32> = candidates.versions.iter().map(|v| v.ordinal).collect();
        for slot in self.read_slots(&ordinals)? {
            if !slot.deleted && slot.record.schema_info.same_schema(schema) {
                return Ok(slot.record.version_info);
            }
        }
        Err(self.not_found(&format!("schema {}", schema.object_type)))
    }

    /// Append a schema with the next ordinal and version
    ///
    /// `properties` must have been read under `etag`. Does not deduplicate:
    /// callers look the schema up with [`Group::get_version`] first.
    ///
    /// # Errors
    ///
    /// - `WriteConflict` if the group changed since `etag` was read
    /// - `IllegalState` if `etag` is absent
    pub fn add_schema(
        &self,
        schema: &SchemaInfo,
        properties: &GroupProperties,
        etag: &Etag,
    ) -> Result<VersionInfo> {
        let expected_etag = self.expected_etag(etag)?;
        let scoped = properties.validate_by_object_type;
        let fingerprint = (self.fingerprint)(&schema.schema);
        let type_key = LatestTypeSchemaKey {
            object_type: schema.object_type.clone(),
        };

        let mut keys: Vec<RecordKey> = vec![LatestSchemaKey.into(), FingerprintKey { fingerprint }.into()];
        if scoped {
            keys.push(type_key.clone().into());
            keys.push(ObjectTypesKey.into());
        }
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();
        let latest = downcast::<LatestSchemaKey>(read.next().flatten())?;
        let candidates = downcast::<FingerprintKey>(read.next().flatten())?;
        let (latest_of_type, object_types) = if scoped {
            (
                downcast::<LatestTypeSchemaKey>(read.next().flatten())?,
                downcast::<ObjectTypesKey>(read.next().flatten())?,
            )
        } else {
            (None, None)
        };

        let ordinal = latest
            .as_ref()
            .map(|l| l.value.version_info.ordinal + 1)
            .unwrap_or(0);
        let version = if scoped {
            latest_of_type
                .as_ref()
                .map(|l| l.value.version_info.version + 1)
                .unwrap_or(0)
        } else {
            ordinal
        };
        let version_info = VersionInfo::new(schema.object_type.clone(), version, ordinal);

        let candidates_version = candidates.as_ref().map(|c| c.version);
        let mut versions = candidates.map(|c| c.value).unwrap_or_default();
        versions.versions.push(version_info.clone());

        let mut batch = WriteBatch::new();
        batch
            .put(EtagKey, EtagRecord, expected_etag)
            .create(
                SchemaKey { ordinal },
                SchemaRecord {
                    schema_info: schema.clone(),
                    version_info: version_info.clone(),
                    compatibility: properties.compatibility.clone(),
                    created_at: now_millis(),
                },
            )
            .create(
                TypeVersionKey {
                    object_type: schema.object_type.clone(),
                    version,
                },
                TypeVersionRecord { ordinal },
            )
            .put(FingerprintKey { fingerprint }, versions, candidates_version)
            .put(
                LatestSchemaKey,
                LatestSchemaRecord {
                    version_info: version_info.clone(),
                },
                latest.map(|l| l.version),
            );

        if scoped {
            batch.put(
                type_key,
                LatestTypeSchemaRecord {
                    version_info: version_info.clone(),
                },
                latest_of_type.map(|l| l.version),
            );
            let types_version = object_types.as_ref().map(|t| t.version);
            let mut types = object_types.map(|t| t.value).unwrap_or_default();
            if !types.object_types.contains(&schema.object_type) {
                types.object_types.push(schema.object_type.clone());
                batch.put(ObjectTypesKey, types, types_version);
            }
        }

        batch.commit(self.table.as_ref())?;
        debug!(group = %self.name, object_type = %version_info.object_type, version, ordinal, "Added schema");
        Ok(version_info)
    }

    /// Logically delete a schema
    ///
    /// The slot and its ordinal stay reserved and encoding ids bound to it
    /// keep resolving. Deleting twice is a no-op.
    pub fn delete_schema(&self, version_info: &VersionInfo, etag: &Etag) -> Result<()> {
        let expected_etag = self.expected_etag(etag)?;
        let ordinal = version_info.ordinal;
        let keys: [RecordKey; 2] = [SchemaKey { ordinal }.into(), SchemaDeletedKey { ordinal }.into()];
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();
        let live = downcast::<SchemaKey>(read.next().flatten())?
            .map(|s| same_coordinates(&s.value.version_info, version_info))
            .unwrap_or(false);
        if !live {
            return Err(self.not_found(&format!("schema {}", version_info)));
        }
        if read.next().flatten().is_some() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.put(EtagKey, EtagRecord, expected_etag).create(
            SchemaDeletedKey { ordinal },
            SchemaDeletedRecord {
                deleted_at: now_millis(),
            },
        );
        batch.commit(self.table.as_ref())?;
        debug!(group = %self.name, ordinal, "Deleted schema");
        Ok(())
    }

    /// Schema at the given coordinates, including deleted ones
    pub fn get_schema(&self, version_info: &VersionInfo) -> Result<SchemaInfo> {
        let record = self
            .table
            .get(&SchemaKey {
                ordinal: version_info.ordinal,
            })?
            .filter(|r| same_coordinates(&r.version_info, version_info))
            .ok_or_else(|| self.not_found(&format!("schema {}", version_info)))?;
        Ok(record.schema_info)
    }

    /// Schema with the given version of an object type
    pub fn get_schema_by_type_version(
        &self,
        object_type: &str,
        version: i32,
    ) -> Result<SchemaWithVersion> {
        let missing = || self.not_found(&format!("schema {} v{}", object_type, version));
        let index = self
            .table
            .get(&TypeVersionKey {
                object_type: object_type.to_string(),
                version,
            })?
            .ok_or_else(missing)?;
        let record = self
            .table
            .get(&SchemaKey {
                ordinal: index.ordinal,
            })?
            .ok_or_else(missing)?;
        Ok(SchemaWithVersion {
            schema_info: record.schema_info,
            version_info: record.version_info,
        })
    }

    /// Live schemas in ordinal order, optionally of one object type
    pub fn get_schemas(&self, object_type: Option<&str>) -> Result<Vec<SchemaWithVersion>> {
        Ok(self
            .all_slots()?
            .into_iter()
            .filter(|s| !s.deleted && matches_type(&s.record, object_type))
            .map(|s| SchemaWithVersion {
                schema_info: s.record.schema_info,
                version_info: s.record.version_info,
            })
            .collect())
    }

    /// Every schema ever added, deleted ones included, in ordinal order
    pub fn get_history(&self, object_type: Option<&str>) -> Result<Vec<GroupHistoryRecord>> {
        Ok(self
            .all_slots()?
            .into_iter()
            .filter(|s| matches_type(&s.record, object_type))
            .map(|s| GroupHistoryRecord {
                schema_info: s.record.schema_info,
                version_info: s.record.version_info,
                compatibility: s.record.compatibility,
                created_at: s.record.created_at,
            })
            .collect())
    }

    /// Most recent live schema, optionally of one object type
    pub fn get_latest_schema(&self, object_type: Option<&str>) -> Result<Option<SchemaWithVersion>> {
        let pointer = match object_type {
            None => self
                .table
                .get(&LatestSchemaKey)?
                .map(|l| l.version_info),
            Some(t) => self
                .table
                .get(&LatestTypeSchemaKey {
                    object_type: t.to_string(),
                })?
                .map(|l| l.version_info),
        };

        if let Some(version_info) = pointer {
            let slot = self
                .read_slots(&[version_info.ordinal])?
                .pop()
                .filter(|s| !s.deleted);
            if let Some(slot) = slot {
                return Ok(Some(SchemaWithVersion {
                    schema_info: slot.record.schema_info,
                    version_info: slot.record.version_info,
                }));
            }
        }

        // Pointer missing (unscoped type query) or pointing at a deleted schema
        Ok(self.get_schemas(object_type)?.pop())
    }

    /// Coordinates of the most recent live schema of an object type
    pub fn get_latest_schema_version(&self, object_type: Option<&str>) -> Result<Option<VersionInfo>> {
        Ok(self.get_latest_schema(object_type)?.map(|s| s.version_info))
    }

    /// Object-type names in first-seen order
    pub fn get_object_types(&self) -> Result<Vec<String>> {
        if let Some(types) = self.table.get(&ObjectTypesKey)? {
            return Ok(types.object_types);
        }
        let mut types: Vec<String> = Vec::new();
        for slot in self.all_slots()? {
            if !types.contains(&slot.record.version_info.object_type) {
                types.push(slot.record.version_info.object_type);
            }
        }
        Ok(types)
    }

    // ========================================================================
    // Codecs
    // ========================================================================

    /// Registered codecs in registration order
    pub fn get_codec_types(&self) -> Result<Vec<CodecType>> {
        Ok(self
            .table
            .get(&CodecTypesKey)?
            .map(|r| r.codec_types)
            .unwrap_or_default())
    }

    /// Register a codec; no-op if a codec with the same name exists
    ///
    /// Names are unique within a group. Encoding ids can only be created for
    /// the codec exactly as registered, properties included.
    ///
    /// Retries its read-modify-write on conflict per the codec retry policy.
    pub fn add_codec(&self, codec_type: &CodecType) -> Result<()> {
        self.codec_retry.run("add_codec", || {
            let current = self.table.get_with_version(&CodecTypesKey)?;
            let (mut list, expected) = match current {
                Some(v) => (v.value, Some(v.version)),
                None => (CodecTypesRecord::default(), None),
            };
            if list.find(&codec_type.name).is_some() {
                return Ok(());
            }
            list.codec_types.push(codec_type.clone());
            self.table.update(CodecTypesKey, list, expected)?;
            debug!(group = %self.name, codec = %codec_type, "Added codec");
            Ok(())
        })
    }

    // ========================================================================
    // Encoding ids
    // ========================================================================

    /// Encoding id bound to (version, codec), or the etag to create one under
    pub fn get_encoding_id(
        &self,
        version_info: &VersionInfo,
        codec_type: &CodecType,
    ) -> Result<EncodingIdLookup> {
        let keys: [RecordKey; 2] = [
            EncodingInfoKey {
                version_info: version_info.clone(),
                codec_type: codec_type.clone(),
            }
            .into(),
            EtagKey.into(),
        ];
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();
        let binding = downcast::<EncodingInfoKey>(read.next().flatten())?;
        let etag = read.next().flatten().map(|v| v.version);

        Ok(match binding {
            Some(b) => EncodingIdLookup::Found(b.value.encoding_id),
            None => EncodingIdLookup::Absent(self.table.to_etag(etag)),
        })
    }

    /// Bind (version, codec) to the next encoding id
    ///
    /// Returns the existing id if the pair is already bound.
    ///
    /// # Errors
    ///
    /// - `CodecNotFound` if this exact codec, properties included, is not registered
    /// - `NotFound` if no live schema has these coordinates
    /// - `WriteConflict` if the group changed since `etag` was read
    pub fn create_encoding_id(
        &self,
        version_info: &VersionInfo,
        codec_type: &CodecType,
        etag: &Etag,
    ) -> Result<EncodingId> {
        let expected_etag = self.expected_etag(etag)?;
        let keys: [RecordKey; 5] = [
            CodecTypesKey.into(),
            LatestEncodingIdKey.into(),
            EncodingInfoKey {
                version_info: version_info.clone(),
                codec_type: codec_type.clone(),
            }
            .into(),
            SchemaKey {
                ordinal: version_info.ordinal,
            }
            .into(),
            SchemaDeletedKey {
                ordinal: version_info.ordinal,
            }
            .into(),
        ];
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();
        let codecs = downcast::<CodecTypesKey>(read.next().flatten())?
            .map(|c| c.value)
            .unwrap_or_default();
        let latest = downcast::<LatestEncodingIdKey>(read.next().flatten())?;
        let existing = downcast::<EncodingInfoKey>(read.next().flatten())?;
        let slot = downcast::<SchemaKey>(read.next().flatten())?;
        let deleted = read.next().flatten().is_some();

        if !codecs.contains(codec_type) {
            return Err(Error::CodecNotFound(format!(
                "{} in group {}",
                codec_type, self.name
            )));
        }
        if let Some(existing) = existing {
            return Ok(existing.value.encoding_id);
        }
        let live = slot
            .map(|s| same_coordinates(&s.value.version_info, version_info))
            .unwrap_or(false);
        if !live || deleted {
            return Err(self.not_found(&format!("schema {}", version_info)));
        }

        let encoding_id = latest
            .as_ref()
            .map(|l| l.value.encoding_id.next())
            .unwrap_or(EncodingId::new(0));

        let mut batch = WriteBatch::new();
        batch
            .put(EtagKey, EtagRecord, expected_etag)
            .create(
                EncodingIdKey { encoding_id },
                EncodingBindingRecord {
                    version_info: version_info.clone(),
                    codec_type: codec_type.clone(),
                },
            )
            .create(
                EncodingInfoKey {
                    version_info: version_info.clone(),
                    codec_type: codec_type.clone(),
                },
                EncodingIdRecord { encoding_id },
            )
            .put(
                LatestEncodingIdKey,
                LatestEncodingIdRecord { encoding_id },
                latest.map(|l| l.version),
            );
        batch.commit(self.table.as_ref())?;

        debug!(group = %self.name, %encoding_id, version = %version_info, codec = %codec_type, "Allocated encoding id");
        Ok(encoding_id)
    }

    /// Writer schema and codec bound to an encoding id
    pub fn get_encoding_info(&self, encoding_id: EncodingId) -> Result<EncodingInfo> {
        let binding = self
            .table
            .get(&EncodingIdKey { encoding_id })?
            .ok_or_else(|| self.not_found(&format!("encoding id {}", encoding_id)))?;
        let record = self
            .table
            .get(&SchemaKey {
                ordinal: binding.version_info.ordinal,
            })?
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "group {}: encoding id {} bound to missing schema {}",
                    self.name, encoding_id, binding.version_info
                ))
            })?;

        Ok(EncodingInfo {
            version_info: binding.version_info,
            schema_info: record.schema_info,
            codec_type: binding.codec_type,
        })
    }

    // ========================================================================
    // Policy
    // ========================================================================

    /// Replace the compatibility policy; no write if it is unchanged
    pub fn update_validation_policy(&self, compatibility: &Compatibility, etag: &Etag) -> Result<()> {
        let expected_etag = self.expected_etag(etag)?;
        let current = self
            .table
            .get_with_version(&ValidationPolicyKey)?
            .ok_or_else(|| self.not_found("validation policy"))?;
        if &current.value.compatibility == compatibility {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.put(EtagKey, EtagRecord, expected_etag).put(
            ValidationPolicyKey,
            ValidationPolicyRecord {
                compatibility: compatibility.clone(),
            },
            Some(current.version),
        );
        batch.commit(self.table.as_ref())?;
        info!(group = %self.name, ?compatibility, "Updated validation policy");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn expected_etag(&self, etag: &Etag) -> Result<Option<Version>> {
        if etag.is_absent() {
            return Err(Error::IllegalState(format!(
                "group {} is not initialized",
                self.name
            )));
        }
        Ok(self.table.from_etag(etag))
    }

    fn not_found(&self, what: &str) -> Error {
        Error::NotFound(format!("{} in group {}", what, self.name))
    }

    /// Slots and deletion markers for `ordinals`, in one snapshot
    fn read_slots(&self, ordinals: &[i32]) -> Result<Vec<Slot>> {
        let mut keys: Vec<RecordKey> = Vec::with_capacity(ordinals.len() * 2);
        for &ordinal in ordinals {
            keys.push(SchemaKey { ordinal }.into());
            keys.push(SchemaDeletedKey { ordinal }.into());
        }
        let mut read = self.table.get_entries_with_version(&keys)?.into_iter();

        let mut slots = Vec::with_capacity(ordinals.len());
        for &ordinal in ordinals {
            let record = downcast::<SchemaKey>(read.next().flatten())?.ok_or_else(|| {
                Error::Corruption(format!(
                    "group {}: schema slot {} is referenced but missing",
                    self.name, ordinal
                ))
            })?;
            let deleted = read.next().flatten().is_some();
            slots.push(Slot {
                record: record.value,
                deleted,
            });
        }
        Ok(slots)
    }

    fn all_slots(&self) -> Result<Vec<Slot>> {
        let count = match self.table.get(&LatestSchemaKey)? {
            Some(latest) => latest.version_info.ordinal + 1,
            None => return Ok(Vec::new()),
        };
        let ordinals: Vec<i32> = (0..count).collect();
        self.read_slots(&ordinals)
    }
}

fn matches_type(record: &SchemaRecord, object_type: Option<&str>) -> bool {
    object_type.map_or(true, |t| record.version_info.object_type == t)
}

fn same_coordinates(a: &VersionInfo, b: &VersionInfo) -> bool {
    a.ordinal == b.ordinal && a.version == b.version && a.object_type == b.object_type
}
