//! Closed record model
//!
//! Everything a group (or the groups directory) stores is one of a fixed set
//! of key/value pairs. Each key type names exactly one legal value type through
//! [`TableKey::Value`], so typed reads and writes are checked at compile time.
//! Tables themselves traffic in the erased [`RecordKey`] / [`RecordValue`]
//! enums; converting an erased value back to the wrong concrete type fails
//! with [`Error::TypeMismatch`].
//!
//! ## Immutable records
//!
//! Some pairs are written once and never change: group properties, schema
//! slots, deletion markers, the (type, version) index and both directions of
//! an encoding-id binding. [`RecordKey::is_immutable`] reports this, and it is
//! the only thing a cache may rely on.

use crate::error::{Error, Result};
use crate::types::{
    CodecType, Compatibility, EncodingId, Properties, SchemaInfo, SerializationFormat, VersionInfo,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A typed key statically paired with its value type
pub trait TableKey: Clone + fmt::Debug + Into<RecordKey> {
    /// The only value type that may be stored under this key
    type Value: Clone + fmt::Debug + Into<RecordValue> + TryFrom<RecordValue, Error = Error>;
}

macro_rules! record_pairs {
    ($( $key:ident => $value:ident, immutable: $imm:expr; )*) => {
        /// Erased record key
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum RecordKey {
            $(
                #[allow(missing_docs)]
                $key($key),
            )*
        }

        /// Erased record value
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum RecordValue {
            $(
                #[allow(missing_docs)]
                $value($value),
            )*
        }

        impl RecordKey {
            /// Whether records under this key are never modified after creation
            pub fn is_immutable(&self) -> bool {
                match self {
                    $( RecordKey::$key(_) => $imm, )*
                }
            }

            /// Name of the key type, for diagnostics
            pub fn kind(&self) -> &'static str {
                match self {
                    $( RecordKey::$key(_) => stringify!($key), )*
                }
            }

            /// Whether `value` is the value type paired with this key
            pub fn accepts(&self, value: &RecordValue) -> bool {
                matches!(
                    (self, value),
                    $( (RecordKey::$key(_), RecordValue::$value(_)) )|*
                )
            }
        }

        impl RecordValue {
            /// Name of the value type, for diagnostics
            pub fn kind(&self) -> &'static str {
                match self {
                    $( RecordValue::$value(_) => stringify!($value), )*
                }
            }
        }

        $(
            impl From<$key> for RecordKey {
                fn from(key: $key) -> Self {
                    RecordKey::$key(key)
                }
            }

            impl From<$value> for RecordValue {
                fn from(value: $value) -> Self {
                    RecordValue::$value(value)
                }
            }

            impl TryFrom<RecordValue> for $value {
                type Error = Error;

                fn try_from(value: RecordValue) -> Result<Self> {
                    match value {
                        RecordValue::$value(inner) => Ok(inner),
                        other => Err(Error::TypeMismatch {
                            expected: stringify!($value),
                            actual: other.kind(),
                        }),
                    }
                }
            }

            impl TableKey for $key {
                type Value = $value;
            }
        )*
    };
}

record_pairs! {
    GroupPropertiesKey => GroupPropertiesRecord, immutable: true;
    ValidationPolicyKey => ValidationPolicyRecord, immutable: false;
    EtagKey => EtagRecord, immutable: false;
    SchemaKey => SchemaRecord, immutable: true;
    SchemaDeletedKey => SchemaDeletedRecord, immutable: true;
    FingerprintKey => SchemaVersionList, immutable: false;
    LatestSchemaKey => LatestSchemaRecord, immutable: false;
    LatestTypeSchemaKey => LatestTypeSchemaRecord, immutable: false;
    ObjectTypesKey => ObjectTypesRecord, immutable: false;
    TypeVersionKey => TypeVersionRecord, immutable: true;
    CodecTypesKey => CodecTypesRecord, immutable: false;
    EncodingIdKey => EncodingBindingRecord, immutable: true;
    EncodingInfoKey => EncodingIdRecord, immutable: true;
    LatestEncodingIdKey => LatestEncodingIdRecord, immutable: false;
    GroupEntryKey => GroupEntryRecord, immutable: false;
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::SchemaKey(k) => write!(f, "schema/{}", k.ordinal),
            RecordKey::SchemaDeletedKey(k) => write!(f, "schema-deleted/{}", k.ordinal),
            RecordKey::FingerprintKey(k) => write!(f, "fingerprint/{:016x}", k.fingerprint),
            RecordKey::LatestTypeSchemaKey(k) => write!(f, "latest/{}", k.object_type),
            RecordKey::TypeVersionKey(k) => write!(f, "type-version/{}/{}", k.object_type, k.version),
            RecordKey::EncodingIdKey(k) => write!(f, "encoding-id/{}", k.encoding_id),
            RecordKey::EncodingInfoKey(k) => {
                write!(f, "encoding-info/{}/{}", k.version_info, k.codec_type)
            }
            RecordKey::GroupEntryKey(k) => write!(f, "group/{}", k.name),
            other => f.write_str(other.kind()),
        }
    }
}

/// Serialize a key into the stable byte form used by persisted drivers
pub fn encode_key(key: &RecordKey) -> Result<Vec<u8>> {
    Ok(bincode::serialize(key)?)
}

/// Inverse of [`encode_key`]
pub fn decode_key(bytes: &[u8]) -> Result<RecordKey> {
    Ok(bincode::deserialize(bytes)?)
}

/// Serialize a value into the byte form used by persisted drivers
pub fn encode_value(value: &RecordValue) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Inverse of [`encode_value`]
pub fn decode_value(bytes: &[u8]) -> Result<RecordValue> {
    Ok(bincode::deserialize(bytes)?)
}

// ============================================================================
// Group configuration
// ============================================================================

/// Singleton key of the immutable group properties
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupPropertiesKey;

/// Group properties minus the compatibility policy, which lives in its own record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPropertiesRecord {
    /// Format every schema in the group must have
    pub serialization_format: SerializationFormat,
    /// Version schemas per object-type name
    pub validate_by_object_type: bool,
    /// Free-form properties
    pub properties: Properties,
}

/// Singleton key of the current compatibility policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationPolicyKey;

/// Current compatibility policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicyRecord {
    /// The policy
    pub compatibility: Compatibility,
}

/// Singleton sentinel key whose version is the group's etag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EtagKey;

/// Sentinel value; only its version matters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagRecord;

// ============================================================================
// Schemas
// ============================================================================

/// Ordinal-keyed schema slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaKey {
    /// Group-wide ordinal
    pub ordinal: i32,
}

/// A schema as it was added, with the policy then in force
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// The schema
    pub schema_info: SchemaInfo,
    /// Its coordinates
    pub version_info: VersionInfo,
    /// Policy snapshot at addition time
    pub compatibility: Compatibility,
    /// Milliseconds since the epoch at addition time
    pub created_at: i64,
}

/// Deletion marker for a schema slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaDeletedKey {
    /// Ordinal of the deleted schema
    pub ordinal: i32,
}

/// Logical deletion of a schema; the slot itself is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDeletedRecord {
    /// Milliseconds since the epoch at deletion time
    pub deleted_at: i64,
}

/// Content fingerprint of schema bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintKey {
    /// 64-bit hash of the raw schema bytes
    pub fingerprint: u64,
}

/// Every schema whose bytes hash to the same fingerprint, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersionList {
    /// Candidate coordinates
    pub versions: Vec<VersionInfo>,
}

/// Singleton key of the most recently added schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatestSchemaKey;

/// Group-wide latest pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSchemaRecord {
    /// Coordinates of the latest schema
    pub version_info: VersionInfo,
}

/// Latest schema of one object type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatestTypeSchemaKey {
    /// Object-type name
    pub object_type: String,
}

/// Per object-type latest pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestTypeSchemaRecord {
    /// Coordinates of the latest schema of the type
    pub version_info: VersionInfo,
}

/// Singleton key of the list of object-type names seen by the group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectTypesKey;

/// Object-type names in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypesRecord {
    /// Names
    pub object_types: Vec<String>,
}

/// (object type, version) coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeVersionKey {
    /// Object-type name
    pub object_type: String,
    /// Version within the type
    pub version: i32,
}

/// Ordinal of the schema at a (type, version) coordinate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeVersionRecord {
    /// Group-wide ordinal
    pub ordinal: i32,
}

// ============================================================================
// Codecs and encoding ids
// ============================================================================

/// Singleton key of the codec list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecTypesKey;

/// Registered codecs in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecTypesRecord {
    /// Codecs
    pub codec_types: Vec<CodecType>,
}

impl CodecTypesRecord {
    /// Registered codec with this name
    pub fn find(&self, name: &str) -> Option<&CodecType> {
        self.codec_types.iter().find(|c| c.name == name)
    }

    /// Whether exactly this codec, properties included, is registered
    pub fn contains(&self, codec_type: &CodecType) -> bool {
        self.find(&codec_type.name) == Some(codec_type)
    }
}

/// Encoding id to binding direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingIdKey {
    /// The id
    pub encoding_id: EncodingId,
}

/// What an encoding id stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingBindingRecord {
    /// Writer schema coordinates
    pub version_info: VersionInfo,
    /// Codec
    pub codec_type: CodecType,
}

/// Binding to encoding id direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingInfoKey {
    /// Writer schema coordinates
    pub version_info: VersionInfo,
    /// Codec
    pub codec_type: CodecType,
}

/// The id bound to a (version, codec) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingIdRecord {
    /// The id
    pub encoding_id: EncodingId,
}

/// Singleton key of the highest allocated encoding id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatestEncodingIdKey;

/// Highest allocated encoding id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestEncodingIdRecord {
    /// The id
    pub encoding_id: EncodingId,
}

// ============================================================================
// Groups directory
// ============================================================================

/// Lifecycle state of a named group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupState {
    /// Table is being initialized; not visible to readers
    Creating,
    /// Fully initialized
    Active,
    /// Table is being destroyed; not visible to readers
    Deleting,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupState::Creating => write!(f, "creating"),
            GroupState::Active => write!(f, "active"),
            GroupState::Deleting => write!(f, "deleting"),
        }
    }
}

/// Directory entry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupEntryKey {
    /// Group name
    pub name: String,
}

/// Directory entry: the incarnation id and its lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntryRecord {
    /// Random id generated when the group entered `Creating`
    pub id: Uuid,
    /// Lifecycle state
    pub state: GroupState,
}
