//! Client-side encoding cache
//!
//! Encoding-id bindings never change once written, so a reader can cache
//! `EncodingId -> EncodingInfo` forever without invalidation.

use crate::group::Group;
use crate::registry::SchemaRegistry;
use dashmap::DashMap;
use schemata_core::error::Result;
use schemata_core::header::decode_message;
use schemata_core::{EncodingId, EncodingInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Resolves an encoding id of one group
pub trait EncodingResolver: Send + Sync {
    /// Writer schema and codec bound to `encoding_id`
    fn resolve(&self, encoding_id: EncodingId) -> Result<EncodingInfo>;
}

impl EncodingResolver for Group {
    fn resolve(&self, encoding_id: EncodingId) -> Result<EncodingInfo> {
        self.get_encoding_info(encoding_id)
    }
}

/// Resolver going through a registry by group name
pub struct RegistryResolver {
    registry: Arc<SchemaRegistry>,
    group: String,
}

impl RegistryResolver {
    /// Resolver for `group` in `registry`
    pub fn new(registry: Arc<SchemaRegistry>, group: impl Into<String>) -> Self {
        RegistryResolver {
            registry,
            group: group.into(),
        }
    }
}

impl EncodingResolver for RegistryResolver {
    fn resolve(&self, encoding_id: EncodingId) -> Result<EncodingInfo> {
        self.registry.get_encoding_info(&self.group, encoding_id)
    }
}

/// Read-through cache of encoding-id bindings
pub struct EncodingCache<R: EncodingResolver> {
    resolver: R,
    entries: DashMap<EncodingId, EncodingInfo>,
    misses: AtomicU64,
}

impl<R: EncodingResolver> EncodingCache<R> {
    /// Empty cache in front of `resolver`
    pub fn new(resolver: R) -> Self {
        EncodingCache {
            resolver,
            entries: DashMap::new(),
            misses: AtomicU64::new(0),
        }
    }

    /// Binding of `encoding_id`, resolved on first use
    ///
    /// Failed lookups are not cached.
    pub fn get(&self, encoding_id: EncodingId) -> Result<EncodingInfo> {
        if let Some(hit) = self.entries.get(&encoding_id) {
            return Ok(hit.value().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let info = self.resolver.resolve(encoding_id)?;
        trace!(%encoding_id, version = %info.version_info, "Caching encoding info");
        self.entries.insert(encoding_id, info.clone());
        Ok(info)
    }

    /// Split a message and resolve its header
    pub fn decode<'a>(&self, message: &'a [u8]) -> Result<(EncodingInfo, &'a [u8])> {
        let (encoding_id, payload) = decode_message(message)?;
        Ok((self.get(encoding_id)?, payload))
    }

    /// Number of cached bindings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups that went to the resolver
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use schemata_core::header::encode_message;
    use schemata_core::{CodecType, GroupProperties, SchemaInfo, SerializationFormat};

    fn registry_with_schema() -> (Arc<SchemaRegistry>, EncodingId) {
        let registry = Arc::new(SchemaRegistry::open(&RegistryConfig::default()).unwrap());
        registry
            .create_group("g", &GroupProperties::new(SerializationFormat::Avro))
            .unwrap();
        let v = registry
            .add_schema("g", &SchemaInfo::new("T", SerializationFormat::Avro, b"a".to_vec()))
            .unwrap();
        let id = registry.get_encoding_id("g", &v, &CodecType::none()).unwrap();
        (registry, id)
    }

    #[test]
    fn test_resolves_once() {
        let (registry, id) = registry_with_schema();
        let cache = EncodingCache::new(RegistryResolver::new(registry, "g"));

        let first = cache.get(id).unwrap();
        let second = cache.get(id).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.schema_info.schema, b"a");
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_cached() {
        let (registry, _) = registry_with_schema();
        let cache = EncodingCache::new(RegistryResolver::new(registry, "g"));
        assert!(cache.get(EncodingId::new(42)).unwrap_err().is_not_found());
        assert!(cache.get(EncodingId::new(42)).unwrap_err().is_not_found());
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_decode_message() {
        let (registry, id) = registry_with_schema();
        let cache = EncodingCache::new(registry.group("g").unwrap());

        let message = encode_message(id, b"payload").unwrap();
        let (info, payload) = cache.decode(&message).unwrap();
        assert_eq!(info.codec_type, CodecType::none());
        assert_eq!(payload, b"payload");
        assert!(cache.decode(&[1, 0, 0, 0, 0]).is_err());
    }
}
