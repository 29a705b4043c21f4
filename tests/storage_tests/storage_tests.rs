//! Tests for base files, delta units, the manifest and the storage manager
//!
//! These tests verify:
//! - Base files: ordered writes, point lookups, iteration, key-order checks
//! - Delta units: seq range metadata, empty units rejected
//! - Manifest: atomic store/load, checksum validation
//! - StorageManager: orphan cleanup, file id allocation, deferred retirement

use std::sync::Arc;

use tabletdb::mutation::RowChange;
use tabletdb::schema::{RowKey, Value};
use tabletdb::storage::{
    base_path, delta_path, BaseFile, BaseFileWriter, BaseRecord, DeltaUnit, DeltaUnitMeta, Manifest,
    Retired, SortedFileReader, StorageManager, DELTA_MAGIC,
};
use tabletdb::TabletError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn record(key: i64, seq: u64) -> BaseRecord {
    BaseRecord {
        as_of_seq: seq,
        values: vec![Value::Int64(key), Value::String(format!("row-{}", key))],
    }
}

fn write_base(dir: &std::path::Path, id: u64, keys: impl IntoIterator<Item = i64>) -> BaseFile {
    let mut writer = BaseFileWriter::create(dir, id).unwrap();
    for k in keys {
        writer.add(&RowKey::from(k), &record(k, k as u64)).unwrap();
    }
    writer.finish().unwrap()
}

fn update(seq: u64, value: i64) -> (u64, RowChange) {
    (seq, RowChange::Update(vec![(1, Value::Int64(value))]))
}

// =============================================================================
// Base File Tests
// =============================================================================

#[test]
fn test_base_file_lookup_and_iteration() {
    let temp = TempDir::new().unwrap();
    let base = write_base(temp.path(), 1, (0..100).map(|k| k * 2));

    assert_eq!(base.id(), 1);
    assert_eq!(base.row_count(), 100);
    assert!(base.file_size() > 0);
    assert_eq!(base.get(&RowKey::from(42)).unwrap(), Some(record(42, 42)));
    assert_eq!(base.get(&RowKey::from(43)).unwrap(), None);
    assert!(base.contains_key(&RowKey::from(198)));
    assert!(!base.contains_key(&RowKey::from(500)));

    let keys: Vec<RowKey> = base.iter().unwrap().map(|item| item.unwrap().0).collect();
    assert_eq!(keys.len(), 100);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_base_file_rejects_out_of_order_keys() {
    let temp = TempDir::new().unwrap();
    let mut writer = BaseFileWriter::create(temp.path(), 1).unwrap();
    writer.add(&RowKey::from(10), &record(10, 1)).unwrap();
    let result = writer.add(&RowKey::from(5), &record(5, 2));
    assert!(matches!(result, Err(TabletError::Storage(_))));
}

#[test]
fn test_base_file_survives_reopen() {
    let temp = TempDir::new().unwrap();
    drop(write_base(temp.path(), 7, 0..10));

    let reopened = BaseFile::open(temp.path(), 7).unwrap();
    assert_eq!(reopened.row_count(), 10);
    assert_eq!(reopened.get(&RowKey::from(3)).unwrap(), Some(record(3, 3)));
    assert_eq!(reopened.path(), base_path(temp.path(), 7).as_path());
}

#[test]
fn test_magic_distinguishes_file_kinds() {
    let temp = TempDir::new().unwrap();
    drop(write_base(temp.path(), 1, 0..3));

    let result = SortedFileReader::<Vec<(u64, RowChange)>>::open(&base_path(temp.path(), 1), DELTA_MAGIC);
    assert!(matches!(result, Err(TabletError::Storage(_))));
}

// =============================================================================
// Delta Unit Tests
// =============================================================================

#[test]
fn test_delta_unit_metadata_and_lookup() {
    let temp = TempDir::new().unwrap();
    let entries = vec![
        (RowKey::from(1), vec![update(10, 1), update(12, 2)]),
        (RowKey::from(5), vec![(11, RowChange::Delete)]),
    ];
    let unit = DeltaUnit::write(temp.path(), 3, entries).unwrap();

    assert_eq!(
        unit.meta(),
        &DeltaUnitMeta {
            id: 3,
            min_seq: 10,
            max_seq: 12,
            change_count: 3,
        }
    );
    assert_eq!(unit.get(&RowKey::from(1)).unwrap(), Some(vec![update(10, 1), update(12, 2)]));
    assert_eq!(unit.get(&RowKey::from(2)).unwrap(), None);
    assert_eq!(unit.keys().count(), 2);
    assert_eq!(unit.path(), delta_path(temp.path(), 3).as_path());
}

#[test]
fn test_empty_delta_unit_rejected() {
    let temp = TempDir::new().unwrap();
    let result = DeltaUnit::write(temp.path(), 1, Vec::new());
    assert!(matches!(result, Err(TabletError::Storage(_))));
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[test]
fn test_manifest_missing_is_none() {
    let temp = TempDir::new().unwrap();
    assert_eq!(Manifest::load(temp.path()).unwrap(), None);
}

#[test]
fn test_manifest_detects_corruption() {
    let temp = TempDir::new().unwrap();
    let manifest = Manifest {
        base_files: vec![1, 4],
        next_file_id: 5,
        memstore_flushed_seq: 40,
        delta_flushed_seq: 30,
        ..Manifest::default()
    };
    manifest.store(temp.path()).unwrap();
    assert_eq!(manifest.durable_seq(), 30);

    let path = temp.path().join("MANIFEST");
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(Manifest::load(temp.path()), Err(TabletError::Storage(_))));
}

// =============================================================================
// StorageManager Tests
// =============================================================================

#[test]
fn test_open_loads_listed_files_and_removes_orphans() {
    let temp = TempDir::new().unwrap();
    drop(write_base(temp.path(), 1, 0..5));
    drop(write_base(temp.path(), 2, 5..10));
    let unit = DeltaUnit::write(temp.path(), 3, vec![(RowKey::from(1), vec![update(20, 9)])]).unwrap();
    let meta = unit.meta().clone();
    drop(unit);

    Manifest {
        base_files: vec![1],
        delta_units: vec![meta],
        next_file_id: 4,
        memstore_flushed_seq: 10,
        delta_flushed_seq: 20,
    }
    .store(temp.path())
    .unwrap();

    let (storage, loaded) = StorageManager::open(temp.path()).unwrap();
    assert_eq!(loaded.base_files.len(), 1);
    assert_eq!(loaded.delta_units.len(), 1);
    assert_eq!(loaded.manifest.memstore_flushed_seq, 10);

    // base 2 was never committed to the manifest
    assert!(!base_path(temp.path(), 2).exists());
    assert!(base_path(temp.path(), 1).exists());
    assert!(storage.allocate_file_id() >= 4);
}

#[test]
fn test_file_ids_are_unique() {
    let temp = TempDir::new().unwrap();
    let (storage, _) = StorageManager::open(temp.path()).unwrap();
    let a = storage.allocate_file_id();
    let b = storage.allocate_file_id();
    assert_ne!(a, b);
    assert_eq!(storage.next_file_id(), b + 1);
}

#[test]
fn test_write_manifest_stamps_next_file_id() {
    let temp = TempDir::new().unwrap();
    let (storage, loaded) = StorageManager::open(temp.path()).unwrap();
    storage.allocate_file_id();
    storage.allocate_file_id();

    let mut manifest = loaded.manifest;
    storage.write_manifest(&mut manifest).unwrap();
    let stored = Manifest::load(temp.path()).unwrap().unwrap();
    assert_eq!(stored.next_file_id, storage.next_file_id());
}

#[test]
fn test_retired_file_deleted_after_last_reader() {
    let temp = TempDir::new().unwrap();
    let (storage, _) = StorageManager::open(temp.path()).unwrap();
    let base = Arc::new(write_base(temp.path(), 9, 0..3));
    let path = base.path().to_path_buf();

    let reader = Arc::clone(&base);
    storage.retire(Retired::Base(base));
    assert_eq!(storage.purge_retired(), 0);
    assert_eq!(storage.retired_count(), 1);
    assert!(path.exists());

    // Still readable while pinned
    assert_eq!(reader.get(&RowKey::from(1)).unwrap(), Some(record(1, 1)));
    drop(reader);

    assert_eq!(storage.purge_retired(), 1);
    assert_eq!(storage.retired_count(), 0);
    assert!(!path.exists());
}
