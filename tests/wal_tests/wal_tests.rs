//! Tests for the segmented WAL
//!
//! These tests verify:
//! - Append/commit/recover round trip across segments
//! - LSNs must strictly increase
//! - Torn tail in the newest segment is truncated
//! - Damage in an older segment is reported as corruption
//! - GC deletes only segments fully covered by the durable LSN

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tabletdb::config::WalSyncStrategy;
use tabletdb::mutation::RowChange;
use tabletdb::schema::{RowKey, Value};
use tabletdb::wal::{list_segment_ids, segment_path, ReadOutcome, WalEntry, WalReader, WalRecovery, WalTarget, WalWriter};
use tabletdb::TabletError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn entry(lsn: u64) -> WalEntry {
    WalEntry::new(
        lsn,
        RowKey::from(lsn as i64),
        RowChange::Insert(vec![Value::Int64(lsn as i64), Value::String(format!("v{}", lsn))]),
        WalTarget::MemStore,
    )
}

fn open_writer(dir: &Path, segment_size: u64) -> WalWriter {
    WalWriter::open(dir, WalSyncStrategy::EveryWrite, segment_size, Vec::new(), 0).unwrap()
}

/// Append `lsns` one commit per entry
fn write_entries(writer: &mut WalWriter, lsns: std::ops::RangeInclusive<u64>) {
    for lsn in lsns {
        writer.append(&entry(lsn)).unwrap();
        writer.commit().unwrap();
    }
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_recover_empty_dir() {
    let temp = TempDir::new().unwrap();
    let (entries, result) = WalRecovery::recover(&temp.path().join("wal")).unwrap();
    assert!(entries.is_empty());
    assert_eq!(result.last_lsn, 0);
    assert!(result.segments.is_empty());
    assert!(!result.was_truncated);
}

#[test]
fn test_append_and_recover() {
    let temp = TempDir::new().unwrap();
    {
        let mut writer = open_writer(temp.path(), 1024 * 1024);
        write_entries(&mut writer, 1..=20);
        assert_eq!(writer.last_lsn(), 20);
    }

    let (entries, result) = WalRecovery::recover(temp.path()).unwrap();
    assert_eq!(entries.len(), 20);
    assert_eq!(result.entries_recovered, 20);
    assert_eq!(result.last_lsn, 20);
    assert_eq!(entries[0], entry(1));
    assert_eq!(entries[19], entry(20));
}

#[test]
fn test_segments_roll_at_size_limit() {
    let temp = TempDir::new().unwrap();
    {
        // Tiny limit: every commit rolls
        let mut writer = open_writer(temp.path(), 1);
        write_entries(&mut writer, 1..=5);
        assert_eq!(writer.segment_count(), 6);
    }

    let ids = list_segment_ids(temp.path()).unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    let (entries, result) = WalRecovery::recover(temp.path()).unwrap();
    assert_eq!(entries.iter().map(|e| e.lsn).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(result.segments.len(), 6);
    assert_eq!(result.segments[0].max_lsn, 1);
    assert_eq!(result.segments[5].max_lsn, 0);
}

#[test]
fn test_reopen_continues_after_existing_segments() {
    let temp = TempDir::new().unwrap();
    {
        let mut writer = open_writer(temp.path(), 1024 * 1024);
        write_entries(&mut writer, 1..=3);
    }
    let (_, result) = WalRecovery::recover(temp.path()).unwrap();
    {
        let mut writer = WalWriter::open(
            temp.path(),
            WalSyncStrategy::EveryWrite,
            1024 * 1024,
            result.segments,
            result.last_lsn,
        )
        .unwrap();
        write_entries(&mut writer, 4..=6);
    }

    let (entries, _) = WalRecovery::recover(temp.path()).unwrap();
    assert_eq!(entries.iter().map(|e| e.lsn).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_append_rejects_non_increasing_lsn() {
    let temp = TempDir::new().unwrap();
    let mut writer = open_writer(temp.path(), 1024 * 1024);
    writer.append(&entry(5)).unwrap();
    let result = writer.append(&entry(5));
    assert!(matches!(result, Err(TabletError::WalCorruption(_))));
}

// =============================================================================
// Damage Tests
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp = TempDir::new().unwrap();
    {
        let mut writer = open_writer(temp.path(), 1024 * 1024);
        write_entries(&mut writer, 1..=4);
    }
    let path = segment_path(temp.path(), 1);
    let clean_len = std::fs::metadata(&path).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 5]).unwrap();
    }

    let verified = WalRecovery::verify(temp.path()).unwrap();
    assert_eq!(verified.entries_corrupted, 1);
    assert!(!verified.was_truncated);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len + 5);

    let (entries, result) = WalRecovery::recover(temp.path()).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
}

#[test]
fn test_checksum_mismatch_reported_as_torn() {
    let temp = TempDir::new().unwrap();
    {
        let mut writer = open_writer(temp.path(), 1024 * 1024);
        write_entries(&mut writer, 1..=2);
    }
    let path = segment_path(temp.path(), 1);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(matches!(reader.next_entry().unwrap(), ReadOutcome::Entry(e) if e.lsn == 1));
    assert!(matches!(reader.next_entry().unwrap(), ReadOutcome::Torn { .. }));
}

#[test]
fn test_damaged_older_segment_is_corruption() {
    let temp = TempDir::new().unwrap();
    {
        let mut writer = open_writer(temp.path(), 1);
        write_entries(&mut writer, 1..=3);
    }
    let path = segment_path(temp.path(), 1);
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01; 3]).unwrap();
    }

    let result = WalRecovery::recover(temp.path());
    assert!(matches!(result, Err(TabletError::WalCorruption(_))));
}

// =============================================================================
// GC Tests
// =============================================================================

#[test]
fn test_gc_removes_covered_segments_only() {
    let temp = TempDir::new().unwrap();
    let mut writer = open_writer(temp.path(), 1);
    write_entries(&mut writer, 1..=5);

    let (count, bytes) = writer.reclaimable(3);
    assert_eq!(count, 3);
    assert!(bytes > 0);

    let removed = writer.gc(3).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(list_segment_ids(temp.path()).unwrap(), vec![4, 5, 6]);

    assert_eq!(writer.gc(3).unwrap(), 0);
}

#[test]
fn test_gc_rolls_fully_covered_active_segment() {
    let temp = TempDir::new().unwrap();
    let mut writer = open_writer(temp.path(), 1024 * 1024);
    write_entries(&mut writer, 1..=3);
    assert_eq!(writer.segment_count(), 1);

    assert_eq!(writer.reclaimable(3).0, 1);
    assert_eq!(writer.gc(3).unwrap(), 1);
    assert_eq!(list_segment_ids(temp.path()).unwrap(), vec![2]);

    // New appends go to the fresh segment
    write_entries(&mut writer, 4..=4);
    let (entries, _) = WalRecovery::recover(temp.path()).unwrap();
    assert_eq!(entries.iter().map(|e| e.lsn).collect::<Vec<_>>(), vec![4]);
}
