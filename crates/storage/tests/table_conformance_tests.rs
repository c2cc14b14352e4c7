//! Versioned table contract conformance
//!
//! The same checks run against every driver: create-if-absent, conditional
//! batch writes, consistent batch reads, scans and conditional removal.

use proptest::prelude::*;
use schemata_core::records::{
    CodecTypesKey, CodecTypesRecord, EtagKey, EtagRecord, LatestEncodingIdKey,
    LatestEncodingIdRecord, SchemaKey, SchemaRecord,
};
use schemata_core::{
    CodecType, Compatibility, EncodingId, RecordKey, SchemaInfo, SerializationFormat, VersionInfo,
};
use schemata_durability::log::{FileLog, MemoryLog};
use schemata_durability::store::{FileStore, MemoryStore, VersionedStore};
use schemata_durability::wal::DurabilityMode;
use schemata_storage::{
    ImmutableCache, InMemoryTable, LogTable, PersistedTable, TableExt, VersionedTable, WriteBatch,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn tables(dir: &TempDir) -> Vec<(&'static str, Arc<dyn VersionedTable>)> {
    let memory_store = Arc::new(MemoryStore::new());
    memory_store.create_table("t").unwrap();
    let file_store = Arc::new(FileStore::open(dir.path().join("store"), DurabilityMode::Strict).unwrap());
    file_store.create_table("t").unwrap();
    let file_log = FileLog::open(dir.path().join("t.log"), DurabilityMode::Strict).unwrap();

    let memory: Arc<dyn VersionedTable> = Arc::new(InMemoryTable::new("t"));
    let memory_store: Arc<dyn VersionedTable> =
        Arc::new(PersistedTable::new("t", memory_store, Arc::new(ImmutableCache::new())));
    let file_store: Arc<dyn VersionedTable> =
        Arc::new(PersistedTable::new("t", file_store, Arc::new(ImmutableCache::new())));
    let memory_log: Arc<dyn VersionedTable> = Arc::new(LogTable::new("t", Arc::new(MemoryLog::new())));
    let file_log: Arc<dyn VersionedTable> = Arc::new(LogTable::new("t", Arc::new(file_log)));

    vec![
        ("memory", memory),
        ("memory store", memory_store),
        ("file store", file_store),
        ("memory log", memory_log),
        ("file log", file_log),
    ]
}

fn latest(id: i32) -> LatestEncodingIdRecord {
    LatestEncodingIdRecord {
        encoding_id: EncodingId::new(id),
    }
}

fn slot(ordinal: i32) -> SchemaRecord {
    SchemaRecord {
        schema_info: SchemaInfo::new("T", SerializationFormat::Avro, vec![ordinal as u8]),
        version_info: VersionInfo::new("T", ordinal, ordinal),
        compatibility: Compatibility::Backward,
        created_at: 0,
    }
}

#[test]
fn test_add_entry_never_overwrites() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        assert!(table.add(LatestEncodingIdKey, latest(0)).unwrap(), "{}", name);
        assert!(!table.add(LatestEncodingIdKey, latest(9)).unwrap(), "{}", name);
        assert_eq!(table.get(&LatestEncodingIdKey).unwrap(), Some(latest(0)), "{}", name);
    }
}

#[test]
fn test_conditional_update_and_conflicts() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        let v1 = table.update(LatestEncodingIdKey, latest(0), None).unwrap();
        assert!(table
            .update(LatestEncodingIdKey, latest(1), None)
            .unwrap_err()
            .is_conflict(), "{}", name);

        let v2 = table.update(LatestEncodingIdKey, latest(1), Some(v1)).unwrap();
        assert_ne!(v1, v2, "{}", name);
        assert!(table
            .update(LatestEncodingIdKey, latest(2), Some(v1))
            .unwrap_err()
            .is_conflict(), "{}", name);
        assert_eq!(
            table.get_with_version(&LatestEncodingIdKey).unwrap().unwrap().version,
            v2,
            "{}",
            name
        );
    }
}

#[test]
fn test_batches_are_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        table.add(EtagKey, EtagRecord).unwrap();
        let etag = table.get_with_version(&EtagKey).unwrap().unwrap().version;

        // Second entry conflicts, so the first must not land either
        let mut batch = WriteBatch::new();
        batch
            .create(SchemaKey { ordinal: 0 }, slot(0))
            .put(EtagKey, EtagRecord, None);
        assert!(batch.commit(table.as_ref()).unwrap_err().is_conflict(), "{}", name);
        assert!(table.get(&SchemaKey { ordinal: 0 }).unwrap().is_none(), "{}", name);

        let mut batch = WriteBatch::new();
        batch
            .create(SchemaKey { ordinal: 0 }, slot(0))
            .put(EtagKey, EtagRecord, Some(etag));
        batch.commit(table.as_ref()).unwrap();
        assert_eq!(table.get(&SchemaKey { ordinal: 0 }).unwrap(), Some(slot(0)), "{}", name);
        assert_ne!(
            table.get_with_version(&EtagKey).unwrap().unwrap().version,
            etag,
            "{}",
            name
        );
    }
}

#[test]
fn test_batch_read_and_scan() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        for ordinal in 0..3 {
            table.add(SchemaKey { ordinal }, slot(ordinal)).unwrap();
        }
        table
            .add(
                CodecTypesKey,
                CodecTypesRecord {
                    codec_types: vec![CodecType::none()],
                },
            )
            .unwrap();

        let read = table
            .get_many(&[SchemaKey { ordinal: 2 }, SchemaKey { ordinal: 7 }, SchemaKey { ordinal: 0 }])
            .unwrap();
        assert_eq!(read[0].as_ref().map(|v| v.value.clone()), Some(slot(2)), "{}", name);
        assert!(read[1].is_none(), "{}", name);
        assert!(read[2].is_some(), "{}", name);

        let slots = table
            .get_all_entries(&|k| matches!(k, RecordKey::SchemaKey(_)))
            .unwrap();
        assert_eq!(slots.len(), 3, "{}", name);
        assert_eq!(table.get_all_keys().unwrap().len(), 4, "{}", name);
    }
}

#[test]
fn test_remove_entry() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        let v = table.update(LatestEncodingIdKey, latest(0), None).unwrap();
        let key: RecordKey = LatestEncodingIdKey.into();
        table.remove_entry(&key, Some(v)).unwrap();
        assert!(table.get_entry(&key).unwrap().is_none(), "{}", name);
        // Absent key is a no-op
        table.remove_entry(&key, None).unwrap();
        // Can be created afresh
        table.update(LatestEncodingIdKey, latest(5), None).unwrap();
        assert_eq!(table.get(&LatestEncodingIdKey).unwrap(), Some(latest(5)), "{}", name);
    }
}

#[test]
fn test_recreated_key_rejects_old_versions() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        let key: RecordKey = LatestEncodingIdKey.into();
        let v1 = table.update(LatestEncodingIdKey, latest(0), None).unwrap();
        let v2 = table.update(LatestEncodingIdKey, latest(1), Some(v1)).unwrap();
        table.remove_entry(&key, Some(v2)).unwrap();

        let v3 = table.update(LatestEncodingIdKey, latest(7), None).unwrap();
        let v4 = table.update(LatestEncodingIdKey, latest(8), Some(v3)).unwrap();
        assert!(![v1, v2].contains(&v3), "{}", name);
        assert!(![v1, v2].contains(&v4), "{}", name);

        // Writers holding versions of the removed incarnation must lose
        for stale in [v1, v2] {
            assert!(table
                .update(LatestEncodingIdKey, latest(99), Some(stale))
                .unwrap_err()
                .is_conflict(), "{}", name);
            assert!(table
                .remove_entry(&key, Some(stale))
                .unwrap_err()
                .is_conflict(), "{}", name);
        }
        assert_eq!(table.get(&LatestEncodingIdKey).unwrap(), Some(latest(8)), "{}", name);
    }
}

#[test]
fn test_etag_round_trip() {
    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        assert!(table.to_etag(None).is_absent(), "{}", name);
        let v = table.update(EtagKey, EtagRecord, None).unwrap();
        let etag = table.to_etag(Some(v));
        assert_eq!(table.from_etag(&etag), Some(v), "{}", name);
    }
}

#[test]
fn test_racing_conditional_updates_one_winner_per_version() {
    const THREADS: usize = 6;
    const ROUNDS: i32 = 20;

    let dir = TempDir::new().unwrap();
    for (name, table) in tables(&dir) {
        table.add(LatestEncodingIdKey, latest(0)).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    barrier.wait();
                    loop {
                        let current = table.get_with_version(&LatestEncodingIdKey).unwrap().unwrap();
                        let next = current.value.encoding_id.id() + 1;
                        if next > ROUNDS {
                            return;
                        }
                        match table.update(LatestEncodingIdKey, latest(next), Some(current.version)) {
                            Ok(_) => {
                                wins.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) if e.is_conflict() => {}
                            Err(e) => panic!("{}", e),
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every increment won exactly once
        assert_eq!(wins.load(Ordering::Relaxed), ROUNDS as usize, "{}", name);
        assert_eq!(table.get(&LatestEncodingIdKey).unwrap(), Some(latest(ROUNDS)), "{}", name);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any sequence of creates and conditional writes leaves every driver in
    /// the same state, with the same writes rejected.
    #[test]
    fn prop_drivers_agree(ops in prop::collection::vec((0i32..4, any::<bool>()), 1..24)) {
        let dir = TempDir::new().unwrap();
        let drivers = tables(&dir);
        let mut outcomes: Vec<Vec<bool>> = Vec::new();

        for (_, table) in &drivers {
            let mut accepted = Vec::new();
            for (ordinal, stale) in &ops {
                let current = table.get_with_version(&EtagKey).unwrap().map(|e| e.version);
                let expected = if *stale { None } else { current };
                let mut batch = WriteBatch::new();
                batch
                    .create(SchemaKey { ordinal: *ordinal }, slot(*ordinal))
                    .put(EtagKey, EtagRecord, expected);
                accepted.push(batch.commit(table.as_ref()).is_ok());
            }
            outcomes.push(accepted);
        }

        for (i, (name, table)) in drivers.iter().enumerate() {
            prop_assert_eq!(&outcomes[i], &outcomes[0], "{}", name);
            let mut ordinals: Vec<i32> = table
                .get_all_entries(&|k| matches!(k, RecordKey::SchemaKey(_)))
                .unwrap()
                .into_iter()
                .filter_map(|(k, _)| match k {
                    RecordKey::SchemaKey(k) => Some(k.ordinal),
                    _ => None,
                })
                .collect();
            ordinals.sort_unstable();
            ordinals.dedup();
            let mut expected: Vec<i32> = ops
                .iter()
                .zip(&outcomes[0])
                .filter(|(_, ok)| **ok)
                .map(|((ordinal, _), _)| *ordinal)
                .collect();
            expected.sort_unstable();
            prop_assert_eq!(ordinals, expected, "{}", name);
        }
    }
}
