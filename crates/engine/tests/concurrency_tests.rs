//! Multi-threaded optimistic concurrency tests
//!
//! Writers race on one group from many threads; conflicts must surface as
//! `WriteConflict` and never corrupt ordinals, encoding ids or codec lists.

use schemata_core::{CodecType, EncodingId, GroupProperties, SchemaInfo, SerializationFormat, VersionInfo};
use schemata_engine::{Group, GroupsDirectory, RegistryConfig, RetryConfig, SchemaRegistry};
use schemata_storage::provider::{LogLocation, LogTableProvider, MemoryTableProvider, TableProvider};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn group_on(provider: Arc<dyn TableProvider>) -> Group {
    let dir = GroupsDirectory::new(provider).unwrap();
    dir.add_new_group("g", &GroupProperties::new(SerializationFormat::Avro))
        .unwrap();
    dir.get_group("g").unwrap()
}

/// Add with a fresh etag until it sticks; counts conflicts seen
fn add_with_retry(group: &Group, schema: &SchemaInfo, conflicts: &AtomicUsize) -> VersionInfo {
    loop {
        let etag = group.current_etag().unwrap();
        let properties = group.get_group_properties().unwrap();
        match group.add_schema(schema, &properties, &etag) {
            Ok(v) => return v,
            Err(e) if e.is_conflict() => {
                conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => panic!("add_schema failed: {}", e),
        }
    }
}

fn race_adds(group: Group) -> Vec<VersionInfo> {
    let group = Arc::new(group);
    let barrier = Arc::new(Barrier::new(THREADS));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let group = Arc::clone(&group);
            let barrier = Arc::clone(&barrier);
            let conflicts = Arc::clone(&conflicts);
            thread::spawn(move || {
                let schema = SchemaInfo::new(
                    "T",
                    SerializationFormat::Avro,
                    format!("schema-{}", i).into_bytes(),
                );
                barrier.wait();
                add_with_retry(&group, &schema, &conflicts)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// ============================================================================
// Ordinals
// ============================================================================

#[test]
fn test_concurrent_adds_get_distinct_dense_ordinals() {
    init_tracing();
    let versions = race_adds(group_on(Arc::new(MemoryTableProvider::new())));

    let ordinals: BTreeSet<i32> = versions.iter().map(|v| v.ordinal).collect();
    assert_eq!(ordinals, (0..THREADS as i32).collect::<BTreeSet<_>>());
}

#[test]
fn test_concurrent_adds_on_log_tables() {
    init_tracing();
    let versions = race_adds(group_on(Arc::new(LogTableProvider::new(LogLocation::Memory))));

    let ordinals: BTreeSet<i32> = versions.iter().map(|v| v.ordinal).collect();
    assert_eq!(ordinals, (0..THREADS as i32).collect::<BTreeSet<_>>());
}

#[test]
fn test_same_etag_one_winner() {
    let group = Arc::new(group_on(Arc::new(MemoryTableProvider::new())));
    let etag = group.current_etag().unwrap();
    let properties = group.get_group_properties().unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|body| {
            let group = Arc::clone(&group);
            let properties = properties.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let schema = SchemaInfo::new("T", SerializationFormat::Avro, body.as_bytes().to_vec());
                barrier.wait();
                group.add_schema(&schema, &properties, &etag)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(e) if e.is_conflict())));

    let loser = results.iter().position(|r| r.is_err()).unwrap();
    let body = ["a", "b"][loser];
    let retried = add_with_retry(
        &group,
        &SchemaInfo::new("T", SerializationFormat::Avro, body.as_bytes().to_vec()),
        &AtomicUsize::new(0),
    );
    assert_eq!(retried.ordinal, 1);
}

// ============================================================================
// Encoding ids
// ============================================================================

#[test]
fn test_racing_get_encoding_id_agrees() {
    init_tracing();
    let registry = Arc::new(
        SchemaRegistry::open(&RegistryConfig::default())
            .unwrap()
            .with_encoding_retry(RetryConfig::unbounded().with_base_delay_ms(0)),
    );
    registry
        .create_group("g", &GroupProperties::new(SerializationFormat::Avro))
        .unwrap();
    let v = registry
        .add_schema("g", &SchemaInfo::new("T", SerializationFormat::Avro, b"a".to_vec()))
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let v = v.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get_encoding_id("g", &v, &CodecType::none()).unwrap()
            })
        })
        .collect();

    let ids: BTreeSet<EncodingId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 1);
    let id = *ids.iter().next().unwrap();
    assert_eq!(id, EncodingId::new(0));

    let info = registry.get_encoding_info("g", id).unwrap();
    assert_eq!(info.version_info, v);
    assert_eq!(info.schema_info.schema, b"a");
}

#[test]
fn test_racing_distinct_pairs_get_distinct_ids() {
    let registry = Arc::new(
        SchemaRegistry::open(&RegistryConfig::default())
            .unwrap()
            .with_encoding_retry(RetryConfig::unbounded().with_base_delay_ms(0)),
    );
    registry
        .create_group("g", &GroupProperties::new(SerializationFormat::Avro))
        .unwrap();
    let versions: Vec<VersionInfo> = (0..THREADS)
        .map(|i| {
            registry
                .add_schema(
                    "g",
                    &SchemaInfo::new("T", SerializationFormat::Avro, vec![i as u8]),
                )
                .unwrap()
        })
        .collect();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = versions
        .iter()
        .cloned()
        .map(|v| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (v.clone(), registry.get_encoding_id("g", &v, &CodecType::none()).unwrap())
            })
        })
        .collect();

    let bound: Vec<(VersionInfo, EncodingId)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: BTreeSet<i32> = bound.iter().map(|(_, id)| id.id()).collect();
    assert_eq!(ids, (0..THREADS as i32).collect::<BTreeSet<_>>());
    for (v, id) in bound {
        assert_eq!(registry.get_encoding_info("g", id).unwrap().version_info, v);
    }
}

// ============================================================================
// Codecs and groups
// ============================================================================

#[test]
fn test_concurrent_add_codec_keeps_every_codec_once() {
    let group = Arc::new(
        group_on(Arc::new(MemoryTableProvider::new()))
            .with_codec_retry(RetryConfig::unbounded().with_base_delay_ms(0)),
    );
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let group = Arc::clone(&group);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                // Half the threads register the same shared codec
                group.add_codec(&CodecType::new(format!("codec-{}", i))).unwrap();
                group.add_codec(&CodecType::new("shared")).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let names: Vec<String> = group
        .get_codec_types()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names.len(), THREADS + 2);
    assert_eq!(names[0], "none");
    assert_eq!(names.iter().filter(|n| *n == "shared").count(), 1);
}

#[test]
fn test_concurrent_add_new_group_initializes_once() {
    init_tracing();
    let dir = Arc::new(GroupsDirectory::new(Arc::new(MemoryTableProvider::new())).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let dir = Arc::clone(&dir);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let format = if i % 2 == 0 {
                    SerializationFormat::Avro
                } else {
                    SerializationFormat::Json
                };
                barrier.wait();
                dir.add_new_group("g", &GroupProperties::new(format)).unwrap()
            })
        })
        .collect();

    let created: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(created.iter().filter(|c| **c).count(), 1);

    let group = dir.get_group("g").unwrap();
    assert!(!group.current_etag().unwrap().is_absent());
    assert_eq!(group.get_codec_types().unwrap(), vec![CodecType::none()]);
    assert_eq!(dir.list_groups().unwrap(), vec!["g"]);
}
