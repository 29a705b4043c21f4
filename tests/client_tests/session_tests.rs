//! Tests for the client write session
//!
//! These tests verify:
//! - A wait/reset/flush_async loop never has more than one flush in flight
//! - Row failures surface as PartialFlush plus drainable row errors
//! - Invalid mutations are rejected at apply and never buffered
//! - Manual mode refuses to overflow; the automatic modes flush instead
//! - close flushes what is buffered and stops the session

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tabletdb::client::SessionStats;
use tabletdb::schema::RowKey;
use tabletdb::{
    Client, ClientBuilder, Config, DataType, FlushMode, Mutation, Schema, Synchronizer, Table,
    TabletError, TabletServer,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _temp: TempDir,
    server: Arc<TabletServer>,
    client: Client,
    table: Table,
}

fn setup() -> Fixture {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp.path()).build();
    let server = Arc::new(TabletServer::open(config).unwrap());
    let client = ClientBuilder::new()
        .local_server(Arc::clone(&server))
        .build_client()
        .unwrap();
    let schema = Schema::builder()
        .key_column("key", DataType::Int64)
        .column("v", DataType::Int64, false)
        .column("note", DataType::String, true)
        .build()
        .unwrap();
    let table = client.create_table("t", schema).unwrap();
    Fixture {
        _temp: temp,
        server,
        client,
        table,
    }
}

fn insert(table: &Table, key: i64, v: i64) -> Mutation {
    let mut m = table.new_insert();
    m.mutable_row().set_int64("key", key).unwrap().set_int64("v", v).unwrap();
    m
}

fn update(table: &Table, key: i64, v: i64) -> Mutation {
    let mut m = table.new_update();
    m.mutable_row().set_int64("key", key).unwrap().set_int64("v", v).unwrap();
    m
}

fn stored_v(server: &TabletServer, key: i64) -> Option<i64> {
    server
        .tablet("t")
        .unwrap()
        .get(&RowKey::from(key))
        .unwrap()
        .and_then(|row| row.get_int64("v"))
}

fn assert_single_flight(stats: &SessionStats) {
    assert_eq!(stats.max_in_flight(), 1);
    assert_eq!(stats.in_flight(), 0);
}

// =============================================================================
// Pipelined Flush Tests
// =============================================================================

#[test]
fn test_pipelined_loop_keeps_one_flush_in_flight() {
    let f = setup();
    let mut session = f.client.new_session();
    let sync = Synchronizer::resolved();

    for k in 0..1000 {
        session.apply(insert(&f.table, k, k * 2)).unwrap();
        if (k + 1) % 100 == 0 {
            sync.wait().unwrap();
            sync.reset();
            session.flush_async(sync.callback()).unwrap();
        }
    }
    sync.wait().unwrap();
    session.close().unwrap();

    let stats = session.stats();
    assert_eq!(stats.flushes(), 10);
    assert_single_flight(stats);
    assert_eq!(stored_v(&f.server, 0), Some(0));
    assert_eq!(stored_v(&f.server, 999), Some(1998));
}

#[test]
fn test_flush_async_waits_for_previous_flush() {
    let f = setup();
    let mut session = f.client.new_session();
    let completed = Arc::new(AtomicUsize::new(0));

    for round in 0..5 {
        for k in 0..20 {
            session.apply(insert(&f.table, round * 100 + k, k)).unwrap();
        }
        let completed = Arc::clone(&completed);
        session
            .flush_async(Box::new(move |status| {
                assert!(status.is_ok());
                completed.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    session.flush_sync().unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert_single_flight(session.stats());
    assert!(!session.has_pending_operations());
}

#[test]
fn test_empty_flush_completes_immediately() {
    let f = setup();
    let mut session = f.client.new_session();
    let sync = Synchronizer::new();

    session.flush_async(sync.callback()).unwrap();
    assert!(sync.is_resolved());
    assert!(sync.wait().is_ok());
    assert_eq!(session.stats().flushes(), 0);
    assert!(session.flush_sync().is_ok());
}

// =============================================================================
// Row Error Tests
// =============================================================================

#[test]
fn test_row_errors_reported_as_partial_flush() {
    let f = setup();
    let mut session = f.client.new_session();

    session.apply(insert(&f.table, 1, 10)).unwrap();
    session.apply(insert(&f.table, 1, 11)).unwrap();
    session.apply(insert(&f.table, 2, 20)).unwrap();
    session.apply(update(&f.table, 3, 30)).unwrap();

    let result = session.flush_sync();
    assert!(matches!(
        result,
        Err(TabletError::PartialFlush { failed: 2, total: 4 })
    ));
    assert_eq!(session.count_pending_errors(), 2);

    let errors = session.pending_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].table, "t");
    assert_eq!(errors[0].operation.key, RowKey::from(1));
    assert!(matches!(errors[0].error, TabletError::AlreadyPresent));
    assert_eq!(errors[1].operation.key, RowKey::from(3));
    assert!(matches!(errors[1].error, TabletError::NotFound));

    // Drained
    assert_eq!(session.count_pending_errors(), 0);
    assert_eq!(stored_v(&f.server, 1), Some(10));
    assert_eq!(stored_v(&f.server, 2), Some(20));
}

#[test]
fn test_unknown_table_fails_whole_flush() {
    let f = setup();
    let missing = Table::new("missing", Schema::clone(f.table.schema()));
    let mut session = f.client.new_session();

    session.apply(insert(&missing, 1, 1)).unwrap();
    session.apply(insert(&missing, 2, 2)).unwrap();
    session.apply(insert(&f.table, 3, 3)).unwrap();

    let result = session.flush_sync();
    assert!(matches!(
        result,
        Err(TabletError::PartialFlush { failed: 2, total: 3 })
    ));
    let errors = session.pending_errors();
    assert!(errors
        .iter()
        .all(|e| e.table == "missing" && matches!(e.error, TabletError::TableNotFound(_))));
    assert_eq!(stored_v(&f.server, 3), Some(3));
}

#[test]
fn test_flush_status_reaches_callback() {
    let f = setup();
    let mut session = f.client.new_session();
    let sync = Synchronizer::new();

    session.apply(update(&f.table, 42, 1)).unwrap();
    session.flush_async(sync.callback()).unwrap();
    assert!(matches!(
        sync.wait(),
        Err(TabletError::PartialFlush { failed: 1, total: 1 })
    ));
    assert!(matches!(session.pending_errors()[0].error, TabletError::NotFound));
}

// =============================================================================
// Apply Validation Tests
// =============================================================================

#[test]
fn test_invalid_mutations_rejected_at_apply() {
    let f = setup();
    let mut session = f.client.new_session();

    let no_key = {
        let mut m = f.table.new_insert();
        m.mutable_row().set_int64("v", 1).unwrap();
        m
    };
    assert!(matches!(session.apply(no_key), Err(TabletError::InvalidPrimaryKey(_))));

    let missing_required = {
        let mut m = f.table.new_insert();
        m.mutable_row().set_int64("key", 1).unwrap();
        m
    };
    assert!(matches!(
        session.apply(missing_required),
        Err(TabletError::SchemaMismatch(_))
    ));

    assert_eq!(session.count_buffered_operations(), 0);
    assert!(!session.has_pending_operations());
}

#[test]
fn test_wrong_column_type_rejected_when_set() {
    let f = setup();
    let mut m = f.table.new_insert();
    assert!(matches!(
        m.mutable_row().set_string("v", "not a number"),
        Err(TabletError::SchemaMismatch(_))
    ));
    assert!(matches!(
        m.mutable_row().set_int64("nope", 1),
        Err(TabletError::SchemaMismatch(_))
    ));
}

// =============================================================================
// Flush Mode Tests
// =============================================================================

#[test]
fn test_manual_mode_refuses_overflow() {
    let f = setup();
    let mut session = f.client.new_session();
    session.set_max_buffered_mutations(2);

    session.apply(insert(&f.table, 1, 1)).unwrap();
    session.apply(insert(&f.table, 2, 2)).unwrap();
    assert!(matches!(
        session.apply(insert(&f.table, 3, 3)),
        Err(TabletError::Flush(_))
    ));
    assert_eq!(session.count_buffered_operations(), 2);

    session.flush_sync().unwrap();
    session.apply(insert(&f.table, 3, 3)).unwrap();
    assert_eq!(session.count_buffered_operations(), 1);
}

#[test]
fn test_flush_mode_change_requires_empty_buffer() {
    let f = setup();
    let mut session = f.client.new_session();
    session.apply(insert(&f.table, 1, 1)).unwrap();

    assert!(matches!(
        session.set_flush_mode(FlushMode::AutoFlushSync),
        Err(TabletError::Config(_))
    ));
    assert_eq!(session.flush_mode(), FlushMode::ManualFlush);

    session.flush_sync().unwrap();
    session.set_flush_mode(FlushMode::AutoFlushSync).unwrap();
    assert_eq!(session.flush_mode(), FlushMode::AutoFlushSync);
}

#[test]
fn test_auto_flush_sync_flushes_full_buffers() {
    let f = setup();
    let mut session = f.client.new_session();
    session.set_flush_mode(FlushMode::AutoFlushSync).unwrap();
    session.set_max_buffered_mutations(10);

    for k in 0..25 {
        session.apply(insert(&f.table, k, k)).unwrap();
    }
    assert_eq!(session.stats().flushes(), 2);
    assert_eq!(session.count_buffered_operations(), 5);
    assert_eq!(stored_v(&f.server, 19), Some(19));
    assert_eq!(stored_v(&f.server, 20), None);

    session.close().unwrap();
    assert_eq!(stored_v(&f.server, 24), Some(24));
}

#[test]
fn test_auto_flush_background_flushes_full_buffers() {
    let f = setup();
    let mut session = f.client.new_session();
    session.set_flush_mode(FlushMode::AutoFlushBackground).unwrap();
    session.set_max_buffered_mutations(10);

    for k in 0..30 {
        session.apply(insert(&f.table, k, k)).unwrap();
    }
    session.close().unwrap();

    assert_eq!(session.stats().flushes(), 3);
    assert_single_flight(session.stats());
    for k in 0..30 {
        assert_eq!(stored_v(&f.server, k), Some(k));
    }
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_flushes_and_stops_session() {
    let f = setup();
    let mut session = f.client.new_session();
    for k in 0..5 {
        session.apply(insert(&f.table, k, k)).unwrap();
    }

    session.close().unwrap();
    assert!(!session.has_pending_operations());
    assert_eq!(stored_v(&f.server, 4), Some(4));

    assert!(matches!(
        session.apply(insert(&f.table, 9, 9)),
        Err(TabletError::ShuttingDown)
    ));
    let sync = Synchronizer::new();
    assert!(session.flush_async(sync.callback()).is_err());
    assert!(matches!(sync.wait(), Err(TabletError::ShuttingDown)));
}

#[test]
fn test_drop_discards_buffered_mutations() {
    let f = setup();
    {
        let mut session = f.client.new_session();
        session.apply(insert(&f.table, 1, 1)).unwrap();
    }
    assert_eq!(stored_v(&f.server, 1), None);
}
