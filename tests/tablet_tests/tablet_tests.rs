//! Tests for the Tablet write path, reads, flushes and recovery
//!
//! These tests verify:
//! - Row-level insert/update/delete semantics and per-row errors
//! - Per-column last-writer-wins across MemStore, base files and deltas
//! - Routing: new rows to the MemStore, changes to stored rows to deltas
//! - Snapshot isolation of scanners across writes and flushes
//! - WAL replay after reopen
//! - WAL garbage collection once stores are flushed

use std::sync::Arc;

use tabletdb::mutation::RowOperation;
use tabletdb::schema::{RowKey, Value};
use tabletdb::{Config, DataType, Schema, Tablet, TabletError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .key_column("key", DataType::Int64)
            .column("name", DataType::String, true)
            .column("count", DataType::Int64, true)
            .build()
            .unwrap(),
    )
}

fn config(temp: &TempDir) -> Config {
    Config::builder().data_dir(temp.path()).build()
}

fn open(temp: &TempDir) -> Tablet {
    Tablet::open(&temp.path().join("t"), "t", schema(), config(temp)).unwrap()
}

fn ins(key: i64, name: &str, count: i64) -> RowOperation {
    RowOperation::insert(
        RowKey::from(key),
        vec![(1, Value::from(name)), (2, Value::Int64(count))],
    )
}

fn set_count(key: i64, count: i64) -> RowOperation {
    RowOperation::update(RowKey::from(key), vec![(2, Value::Int64(count))])
}

fn set_name(key: i64, name: &str) -> RowOperation {
    RowOperation::update(RowKey::from(key), vec![(1, Value::from(name))])
}

fn del(key: i64) -> RowOperation {
    RowOperation::delete(RowKey::from(key))
}

fn values(key: i64, name: &str, count: i64) -> Vec<Value> {
    vec![Value::Int64(key), Value::from(name), Value::Int64(count)]
}

fn get(tablet: &Tablet, key: i64) -> Option<Vec<Value>> {
    tablet
        .get(&RowKey::from(key))
        .unwrap()
        .map(|row| row.into_values())
}

fn scan_all(tablet: &Tablet) -> Vec<Vec<Value>> {
    let mut scanner = tablet.new_scanner().unwrap();
    let mut rows = Vec::new();
    while scanner.has_more() {
        rows.extend(scanner.next_batch(7, None).unwrap());
    }
    rows
}

// =============================================================================
// Write Path Tests
// =============================================================================

#[test]
fn test_insert_and_get() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    let outcome = tablet.write_batch(&[ins(1, "a", 10), ins(2, "b", 20)]).unwrap();
    assert_eq!(outcome.applied, 2);
    assert!(outcome.row_errors.is_empty());
    assert_eq!(tablet.committed_seq(), 2);

    assert_eq!(get(&tablet, 1), Some(values(1, "a", 10)));
    assert_eq!(get(&tablet, 3), None);
}

#[test]
fn test_row_errors_do_not_fail_the_batch() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&[ins(1, "a", 1)]).unwrap();

    let outcome = tablet
        .write_batch(&[ins(1, "dup", 0), set_count(9, 1), ins(2, "b", 2), del(7)])
        .unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.row_errors.len(), 3);
    assert!(matches!(outcome.row_errors[0], (0, TabletError::AlreadyPresent)));
    assert!(matches!(outcome.row_errors[1], (1, TabletError::NotFound)));
    assert!(matches!(outcome.row_errors[2], (3, TabletError::NotFound)));

    // Only applied rows consume sequence numbers
    assert_eq!(tablet.committed_seq(), 2);
    assert_eq!(get(&tablet, 2), Some(values(2, "b", 2)));
}

#[test]
fn test_schema_violations_rejected_per_row() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    let wrong_type = RowOperation::insert(RowKey::from(1), vec![(2, Value::from("not a number"))]);
    let wrong_key = RowOperation::insert(RowKey::new(vec![Value::from("k")]), vec![]);
    let outcome = tablet.write_batch(&[wrong_type, wrong_key, ins(3, "ok", 3)]).unwrap();

    assert_eq!(outcome.applied, 1);
    assert!(matches!(outcome.row_errors[0].1, TabletError::SchemaMismatch(_)));
    assert!(matches!(outcome.row_errors[1].1, TabletError::InvalidPrimaryKey(_)));
}

#[test]
fn test_changes_within_one_batch_apply_in_order() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    let outcome = tablet
        .write_batch(&[ins(5, "a", 1), set_count(5, 2), set_name(5, "b"), del(5), ins(5, "c", 3)])
        .unwrap();
    assert_eq!(outcome.applied, 5);
    assert_eq!(get(&tablet, 5), Some(values(5, "c", 3)));
}

#[test]
fn test_per_column_last_writer_wins_across_stores() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    tablet.write_batch(&[ins(1, "a", 0)]).unwrap();
    assert!(tablet.flush_memstore().unwrap());

    tablet.write_batch(&[set_name(1, "b")]).unwrap();
    assert!(tablet.flush_deltas().unwrap());
    tablet.write_batch(&[set_count(1, 7)]).unwrap();
    tablet.write_batch(&[set_count(1, 8)]).unwrap();

    // name from the flushed unit, count from the newest in-memory change
    assert_eq!(get(&tablet, 1), Some(values(1, "b", 8)));
}

// =============================================================================
// Routing Tests
// =============================================================================

#[test]
fn test_changes_to_stored_rows_go_to_deltas() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    tablet.write_batch(&[ins(1, "a", 1), ins(2, "b", 2)]).unwrap();
    tablet.flush_memstore().unwrap();
    let version = tablet.current_version();
    assert_eq!(version.base_files.len(), 1);
    assert!(version.memstore.is_empty());

    tablet.write_batch(&[set_count(1, 5), ins(3, "c", 3)]).unwrap();
    let version = tablet.current_version();
    assert!(version.delta_memstore.contains_key(&RowKey::from(1)));
    assert!(!version.memstore.contains_key(&RowKey::from(1)));
    assert!(version.memstore.contains_key(&RowKey::from(3)));
}

#[test]
fn test_reinsert_after_delete_of_stored_row() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    tablet.write_batch(&[ins(1, "a", 1)]).unwrap();
    tablet.flush_memstore().unwrap();
    tablet.write_batch(&[del(1)]).unwrap();
    assert_eq!(get(&tablet, 1), None);

    let outcome = tablet.write_batch(&[ins(1, "again", 2)]).unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(get(&tablet, 1), Some(values(1, "again", 2)));
    // The key has delta history, so the re-insert stays with it
    assert!(tablet.current_version().delta_memstore.contains_key(&RowKey::from(1)));
}

#[test]
fn test_memstore_freezes_at_size_limit() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp.path()).memstore_size_limit(256).build();
    let tablet = Tablet::open(&temp.path().join("t"), "t", schema(), config).unwrap();

    let ops: Vec<RowOperation> = (0..50).map(|k| ins(k, "some row payload", k)).collect();
    tablet.write_batch(&ops).unwrap();
    let version = tablet.current_version();
    assert_eq!(version.frozen_memstores.len(), 1);
    assert!(version.memstore.is_empty());

    // Reads still see the frozen rows
    assert_eq!(get(&tablet, 49), Some(values(49, "some row payload", 49)));
    assert!(tablet.flush_memstore().unwrap());
    assert!(tablet.current_version().frozen_memstores.is_empty());
    assert_eq!(scan_all(&tablet).len(), 50);
}

#[test]
fn test_flush_with_nothing_to_flush() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    assert!(!tablet.flush_memstore().unwrap());
    assert!(!tablet.flush_deltas().unwrap());
}

// =============================================================================
// Scanner Tests
// =============================================================================

#[test]
fn test_scan_returns_live_rows_in_key_order() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);

    tablet.write_batch(&(0..20).rev().map(|k| ins(k, "r", k)).collect::<Vec<_>>()).unwrap();
    tablet.flush_memstore().unwrap();
    tablet.write_batch(&[del(3), set_count(4, 40), ins(100, "new", 100)]).unwrap();

    let rows = scan_all(&tablet);
    let keys: Vec<i64> = rows.iter().map(|r| r[0].as_int64().unwrap()).collect();
    let mut expected: Vec<i64> = (0..20).filter(|k| *k != 3).collect();
    expected.push(100);
    assert_eq!(keys, expected);
    assert_eq!(rows[3], values(4, "r", 40));
}

#[test]
fn test_scanner_is_snapshot_isolated() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&(0..10).map(|k| ins(k, "v1", k)).collect::<Vec<_>>()).unwrap();

    let mut scanner = tablet.new_scanner().unwrap();
    let first = scanner.next_batch(3, None).unwrap();
    assert_eq!(first.len(), 3);

    // Concurrent changes: updates, deletes, inserts, a flush and a compaction
    tablet.write_batch(&[set_name(5, "v2"), del(6), ins(50, "late", 50)]).unwrap();
    tablet.flush_memstore().unwrap();
    tablet.write_batch(&[set_name(7, "v2")]).unwrap();
    tablet.flush_deltas().unwrap();
    tablet.compact_deltas_major().unwrap();

    let mut rest = Vec::new();
    while scanner.has_more() {
        rest.extend(scanner.next_batch(3, None).unwrap());
    }
    let all: Vec<Vec<Value>> = first.into_iter().chain(rest).collect();
    assert_eq!(all.len(), 10);
    assert!(all.iter().all(|r| r[1] == Value::from("v1")));
    assert_eq!(scanner.rows_returned(), 10);

    // A new scanner sees the new state
    let now = scan_all(&tablet);
    assert_eq!(now.len(), 10);
    assert_eq!(now.iter().find(|r| r[0] == Value::Int64(5)).unwrap()[1], Value::from("v2"));
}

#[test]
fn test_pinned_files_outlive_retirement() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&[ins(1, "a", 1), ins(2, "b", 2)]).unwrap();
    tablet.flush_memstore().unwrap();
    tablet.write_batch(&[set_count(1, 10)]).unwrap();
    tablet.flush_deltas().unwrap();
    // Flushed stores are unreferenced once no version lists them
    assert_eq!(tablet.purge_retired(), 2);

    let mut scanner = tablet.new_scanner().unwrap();
    tablet.compact_deltas_major().unwrap();

    // The scanner still pins the old base file and delta unit
    assert_eq!(tablet.purge_retired(), 0);
    let rows = scanner.next_batch(10, None).unwrap();
    assert_eq!(rows, vec![values(1, "a", 10), values(2, "b", 2)]);

    drop(scanner);
    assert!(tablet.purge_retired() >= 2);
}

#[test]
fn test_pending_scans_counted_until_exhausted() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&[ins(1, "a", 1), ins(2, "b", 2)]).unwrap();

    let mut scanner = tablet.new_scanner().unwrap();
    assert_eq!(tablet.counters().pending_scans(), 1);
    scanner.next_batch(1, None).unwrap();
    assert_eq!(tablet.counters().pending_scans(), 1);
    scanner.next_batch(1, None).unwrap();
    assert!(!scanner.has_more());
    assert_eq!(tablet.counters().pending_scans(), 0);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_reopen_replays_unflushed_writes() {
    let temp = TempDir::new().unwrap();
    {
        let tablet = open(&temp);
        tablet.write_batch(&[ins(1, "a", 1), ins(2, "b", 2)]).unwrap();
        tablet.flush_memstore().unwrap();
        tablet.write_batch(&[set_count(1, 11), ins(3, "c", 3), del(2)]).unwrap();
    }

    let tablet = open(&temp);
    assert_eq!(tablet.committed_seq(), 5);
    assert_eq!(get(&tablet, 1), Some(values(1, "a", 11)));
    assert_eq!(get(&tablet, 2), None);
    assert_eq!(get(&tablet, 3), Some(values(3, "c", 3)));

    // Replayed MemStore rows were flushed, so key 3 now lives in a base file
    let version = tablet.current_version();
    assert!(version.memstore.is_empty());
    assert!(version.base_files.iter().any(|b| b.contains_key(&RowKey::from(3))));

    // New writes continue after the recovered sequence
    tablet.write_batch(&[set_count(3, 30)]).unwrap();
    assert_eq!(tablet.committed_seq(), 6);
    assert_eq!(get(&tablet, 3), Some(values(3, "c", 30)));
}

#[test]
fn test_reopen_after_full_flush_replays_nothing() {
    let temp = TempDir::new().unwrap();
    {
        let tablet = open(&temp);
        tablet.write_batch(&[ins(1, "a", 1)]).unwrap();
        tablet.flush_memstore().unwrap();
        tablet.write_batch(&[set_count(1, 2)]).unwrap();
        tablet.flush_deltas().unwrap();
    }

    let tablet = open(&temp);
    let version = tablet.current_version();
    assert!(version.memstore.is_empty());
    assert!(version.delta_memstore.is_empty());
    assert_eq!(version.delta_units.len(), 1);
    assert_eq!(get(&tablet, 1), Some(values(1, "a", 2)));
    assert_eq!(tablet.committed_seq(), 2);
}

// =============================================================================
// WAL GC Tests
// =============================================================================

#[test]
fn test_wal_gc_waits_for_flush() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&[ins(1, "a", 1), ins(2, "b", 2)]).unwrap();

    assert_eq!(tablet.wal_durable_seq(), 0);
    assert_eq!(tablet.wal_reclaimable().0, 0);
    assert_eq!(tablet.gc_wal().unwrap(), 0);

    tablet.flush_memstore().unwrap();
    assert_eq!(tablet.wal_durable_seq(), 2);
    assert_eq!(tablet.wal_reclaimable().0, 1);
    assert_eq!(tablet.gc_wal().unwrap(), 1);

    // Recovery still works after the GC
    drop(tablet);
    let tablet = open(&temp);
    assert_eq!(get(&tablet, 2), Some(values(2, "b", 2)));
}

#[test]
fn test_wal_durable_seq_tracks_oldest_unflushed_delta() {
    let temp = TempDir::new().unwrap();
    let tablet = open(&temp);
    tablet.write_batch(&[ins(1, "a", 1)]).unwrap();
    tablet.flush_memstore().unwrap();
    tablet.write_batch(&[set_count(1, 2)]).unwrap();
    tablet.write_batch(&[ins(2, "b", 2)]).unwrap();

    // seq 2 (delta) is the oldest change held only in memory
    assert_eq!(tablet.wal_durable_seq(), 1);
    tablet.flush_deltas().unwrap();
    assert_eq!(tablet.wal_durable_seq(), 2);
    tablet.flush_memstore().unwrap();
    assert_eq!(tablet.wal_durable_seq(), 3);
}
