//! Restart recovery of file-backed registries
//!
//! A registry reopened on the same data directory must see every group,
//! schema, codec and encoding id written before it was dropped, and must keep
//! allocating from where it left off.

use schemata_core::{
    CodecType, Compatibility, EncodingId, GroupProperties, SchemaInfo, SerializationFormat,
    VersionInfo,
};
use schemata_engine::{Backend, RegistryConfig, SchemaRegistry};
use tempfile::TempDir;

fn config(backend: Backend, dir: &TempDir) -> RegistryConfig {
    RegistryConfig::default()
        .with_backend(backend)
        .with_data_dir(dir.path().join("data"))
        .with_durability("strict")
}

fn avro(body: &[u8]) -> SchemaInfo {
    SchemaInfo::new("T", SerializationFormat::Avro, body.to_vec())
}

fn populate(registry: &SchemaRegistry) -> EncodingId {
    registry
        .create_group("orders", &GroupProperties::new(SerializationFormat::Avro))
        .unwrap();
    registry
        .create_group("users", &GroupProperties::new(SerializationFormat::Json))
        .unwrap();

    let v0 = registry.add_schema("orders", &avro(b"v0")).unwrap();
    registry.add_schema("orders", &avro(b"v1")).unwrap();
    registry
        .add_codec_type("orders", &CodecType::new("gzip"))
        .unwrap();
    registry
        .update_compatibility("orders", &Compatibility::Full)
        .unwrap();
    registry
        .get_encoding_id("orders", &v0, &CodecType::new("gzip"))
        .unwrap()
}

fn verify(registry: &SchemaRegistry, id: EncodingId) {
    assert_eq!(registry.list_groups().unwrap(), vec!["orders", "users"]);
    assert_eq!(
        registry.get_group_properties("orders").unwrap().compatibility,
        Compatibility::Full
    );
    assert_eq!(registry.get_schemas("orders", None).unwrap().len(), 2);
    assert_eq!(
        registry.get_schema_version("orders", &avro(b"v1")).unwrap(),
        VersionInfo::new("T", 1, 1)
    );

    let info = registry.get_encoding_info("orders", id).unwrap();
    assert_eq!(info.schema_info.schema, b"v0");
    assert_eq!(info.codec_type.name, "gzip");

    // Allocation resumes after the recovered state
    assert_eq!(
        registry.add_schema("orders", &avro(b"v2")).unwrap(),
        VersionInfo::new("T", 2, 2)
    );
    let next = registry
        .get_encoding_id("orders", &VersionInfo::new("T", 2, 2), &CodecType::none())
        .unwrap();
    assert_eq!(next, id.next());
}

#[test]
fn test_table_backend_recovers() {
    let dir = TempDir::new().unwrap();
    let id = {
        let registry = SchemaRegistry::open(&config(Backend::Table, &dir)).unwrap();
        populate(&registry)
    };
    let registry = SchemaRegistry::open(&config(Backend::Table, &dir)).unwrap();
    verify(&registry, id);
}

#[test]
fn test_log_backend_recovers() {
    let dir = TempDir::new().unwrap();
    let id = {
        let registry = SchemaRegistry::open(&config(Backend::Log, &dir)).unwrap();
        populate(&registry)
    };
    let registry = SchemaRegistry::open(&config(Backend::Log, &dir)).unwrap();
    verify(&registry, id);
}

#[test]
fn test_deleted_group_stays_deleted() {
    let dir = TempDir::new().unwrap();
    for backend in [Backend::Table, Backend::Log] {
        let sub = TempDir::new_in(dir.path()).unwrap();
        {
            let registry = SchemaRegistry::open(&config(backend, &sub)).unwrap();
            populate(&registry);
            registry.delete_group("orders").unwrap();
        }
        let registry = SchemaRegistry::open(&config(backend, &sub)).unwrap();
        assert_eq!(registry.list_groups().unwrap(), vec!["users"]);
        assert!(registry
            .get_schemas("orders", None)
            .unwrap_err()
            .is_not_found());
    }
}

#[test]
fn test_deleted_schema_survives_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let registry = SchemaRegistry::open(&config(Backend::Log, &dir)).unwrap();
        let id = populate(&registry);
        registry
            .delete_schema("orders", &VersionInfo::new("T", 0, 0))
            .unwrap();
        id
    };
    let registry = SchemaRegistry::open(&config(Backend::Log, &dir)).unwrap();
    let live: Vec<i32> = registry
        .get_schemas("orders", None)
        .unwrap()
        .iter()
        .map(|s| s.version_info.ordinal)
        .collect();
    assert_eq!(live, vec![1]);
    assert_eq!(registry.get_history("orders", None).unwrap().len(), 2);
    assert_eq!(
        registry.get_encoding_info("orders", id).unwrap().version_info,
        VersionInfo::new("T", 0, 0)
    );
}
