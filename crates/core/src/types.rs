//! Domain types shared by every layer
//!
//! These are the values callers hand to the engine and get back from it:
//! group properties, schemas, version coordinates, codecs, and encoding ids.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form string properties attached to groups, schemas and codecs
pub type Properties = BTreeMap<String, String>;

/// Milliseconds since the Unix epoch, as recorded on schema slots
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Formats and policies
// ============================================================================

/// Serialization format of a schema or of a group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationFormat {
    /// No format recorded
    None,
    /// Apache Avro
    Avro,
    /// Protocol Buffers
    Protobuf,
    /// JSON schema
    Json,
    /// Group accepts schemas of any format
    Any,
    /// Application defined format
    Custom(String),
}

impl SerializationFormat {
    /// Whether a group declared with this format accepts a schema of `schema_format`
    pub fn accepts(&self, schema_format: &SerializationFormat) -> bool {
        matches!(self, SerializationFormat::Any) || self == schema_format
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationFormat::None => write!(f, "none"),
            SerializationFormat::Avro => write!(f, "avro"),
            SerializationFormat::Protobuf => write!(f, "protobuf"),
            SerializationFormat::Json => write!(f, "json"),
            SerializationFormat::Any => write!(f, "any"),
            SerializationFormat::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Compatibility policy applied when a new schema is added to a group
///
/// The engine stores and snapshots the policy; evaluating two schemas against
/// it is delegated to a format-specific checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compatibility {
    /// Every schema is accepted
    AllowAny,
    /// No schema is accepted once the group has one
    DenyAll,
    /// New schema can read data written with the latest schema
    Backward,
    /// Latest schema can read data written with the new schema
    Forward,
    /// Both backward and forward with the latest schema
    Full,
    /// Backward with every existing schema
    BackwardTransitive,
    /// Forward with every existing schema
    ForwardTransitive,
    /// Full with every existing schema
    FullTransitive,
    /// Backward with every schema from the given version onwards
    BackwardTill(VersionInfo),
    /// Forward with every schema from the given version onwards
    ForwardTill(VersionInfo),
    /// Backward from one version onwards and forward from another
    BackwardTillAndForwardTill {
        /// Oldest schema checked backward
        backward_till: VersionInfo,
        /// Oldest schema checked forward
        forward_till: VersionInfo,
    },
    /// Backward with the latest schema, forward from the given version onwards
    BackwardOneAndForwardTill(VersionInfo),
    /// Backward from the given version onwards, forward with the latest schema
    BackwardTillAndForwardOne(VersionInfo),
}

/// Direction of a single compatibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckDirection {
    /// The candidate must read data written with the existing schema
    Backward,
    /// The existing schema must read data written with the candidate
    Forward,
}

/// Existing schemas one direction of a policy is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    /// The most recent schema
    Latest,
    /// Every schema
    All,
    /// Schemas with an ordinal at or above this one
    FromOrdinal(i32),
}

impl Compatibility {
    /// Which schemas are checked in `direction`; `None` means no check
    ///
    /// `AllowAny` and `DenyAll` check nothing pairwise.
    pub fn scope(&self, direction: CheckDirection) -> Option<CheckScope> {
        use CheckDirection::{Backward, Forward};
        use Compatibility as C;

        match (self, direction) {
            (C::AllowAny | C::DenyAll, _) => None,
            (C::Backward, Backward) | (C::Forward, Forward) | (C::Full, _) => Some(CheckScope::Latest),
            (C::Backward | C::BackwardTransitive | C::BackwardTill(_), Forward) => None,
            (C::Forward | C::ForwardTransitive | C::ForwardTill(_), Backward) => None,
            (C::BackwardTransitive, Backward)
            | (C::ForwardTransitive, Forward)
            | (C::FullTransitive, _) => Some(CheckScope::All),
            (C::BackwardTill(v), Backward) | (C::ForwardTill(v), Forward) => {
                Some(CheckScope::FromOrdinal(v.ordinal))
            }
            (C::BackwardTillAndForwardTill { backward_till, .. }, Backward) => {
                Some(CheckScope::FromOrdinal(backward_till.ordinal))
            }
            (C::BackwardTillAndForwardTill { forward_till, .. }, Forward) => {
                Some(CheckScope::FromOrdinal(forward_till.ordinal))
            }
            (C::BackwardOneAndForwardTill(_), Backward) => Some(CheckScope::Latest),
            (C::BackwardOneAndForwardTill(v), Forward) => Some(CheckScope::FromOrdinal(v.ordinal)),
            (C::BackwardTillAndForwardOne(v), Backward) => Some(CheckScope::FromOrdinal(v.ordinal)),
            (C::BackwardTillAndForwardOne(_), Forward) => Some(CheckScope::Latest),
        }
    }
}

impl Default for Compatibility {
    fn default() -> Self {
        Compatibility::Backward
    }
}

/// Group configuration, fixed at creation except for the compatibility policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProperties {
    /// Format every schema in the group must have (or `Any`)
    pub serialization_format: SerializationFormat,
    /// Current compatibility policy
    pub compatibility: Compatibility,
    /// Version schemas per object-type name instead of per group
    pub validate_by_object_type: bool,
    /// Free-form properties
    pub properties: Properties,
}

impl GroupProperties {
    /// Properties with the default policy and no object-type scoping
    pub fn new(serialization_format: SerializationFormat) -> Self {
        GroupProperties {
            serialization_format,
            compatibility: Compatibility::default(),
            validate_by_object_type: false,
            properties: Properties::new(),
        }
    }

    /// Builder: set the compatibility policy
    pub fn with_compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    /// Builder: version schemas per object-type name
    pub fn with_validate_by_object_type(mut self, enabled: bool) -> Self {
        self.validate_by_object_type = enabled;
        self
    }

    /// Builder: add a free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Schemas and versions
// ============================================================================

/// A schema as submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// Object-type name the schema describes
    pub object_type: String,
    /// Serialization format of the schema
    pub serialization_format: SerializationFormat,
    /// Raw schema bytes
    pub schema: Vec<u8>,
    /// Free-form properties
    pub properties: Properties,
}

impl SchemaInfo {
    /// Create a schema with no properties
    pub fn new(
        object_type: impl Into<String>,
        serialization_format: SerializationFormat,
        schema: impl Into<Vec<u8>>,
    ) -> Self {
        SchemaInfo {
            object_type: object_type.into(),
            serialization_format,
            schema: schema.into(),
            properties: Properties::new(),
        }
    }

    /// Builder: add a free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Registry identity: same object-type name and byte-identical schema
    pub fn same_schema(&self, other: &SchemaInfo) -> bool {
        self.object_type == other.object_type && self.schema == other.schema
    }
}

/// Coordinates of a schema within its group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Object-type name
    pub object_type: String,
    /// Version within the object type (equals `ordinal` without scoping)
    pub version: i32,
    /// Group-wide position, strictly increasing and never reused
    pub ordinal: i32,
}

impl VersionInfo {
    /// Create version coordinates
    pub fn new(object_type: impl Into<String>, version: i32, ordinal: i32) -> Self {
        VersionInfo {
            object_type: object_type.into(),
            version,
            ordinal,
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}#{}", self.object_type, self.version, self.ordinal)
    }
}

/// A schema together with its coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaWithVersion {
    /// The schema
    pub schema_info: SchemaInfo,
    /// Its coordinates
    pub version_info: VersionInfo,
}

/// One entry of a group's schema history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHistoryRecord {
    /// The schema
    pub schema_info: SchemaInfo,
    /// Its coordinates
    pub version_info: VersionInfo,
    /// Policy in force when the schema was added
    pub compatibility: Compatibility,
    /// Milliseconds since the epoch at which the schema was added
    pub created_at: i64,
}

// ============================================================================
// Codecs and encoding ids
// ============================================================================

/// Name of the built-in no-op codec
pub const NONE_CODEC: &str = "none";

/// Registered codec (compression or payload encoding) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecType {
    /// Codec name, unique within a group
    pub name: String,
    /// Free-form properties
    pub properties: Properties,
}

impl CodecType {
    /// Create a codec with no properties
    pub fn new(name: impl Into<String>) -> Self {
        CodecType {
            name: name.into(),
            properties: Properties::new(),
        }
    }

    /// The no-op codec every group starts with
    pub fn none() -> Self {
        CodecType::new(NONE_CODEC)
    }

    /// Builder: add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Compact id carried in every message header
///
/// Sequential and non-negative within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EncodingId(i32);

impl EncodingId {
    /// Wrap a raw id
    pub const fn new(id: i32) -> Self {
        EncodingId(id)
    }

    /// The raw id
    pub const fn id(&self) -> i32 {
        self.0
    }

    /// The id allocated after this one
    pub const fn next(&self) -> Self {
        EncodingId(self.0 + 1)
    }
}

impl fmt::Display for EncodingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a reader needs to decode a payload tagged with an encoding id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingInfo {
    /// Writer schema coordinates
    pub version_info: VersionInfo,
    /// Writer schema
    pub schema_info: SchemaInfo,
    /// Codec applied to the payload
    pub codec_type: CodecType,
}
