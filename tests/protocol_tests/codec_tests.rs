//! Codec Tests
//!
//! Tests for command and response framing, and for the checks the decoder
//! applies to untrusted frames.

use std::io::Cursor;

use tabletdb::error::{ErrorCode, WireError};
use tabletdb::mutation::RowOperation;
use tabletdb::protocol::{
    decode_command, decode_response, encode_command, encode_response, read_command, read_response,
    write_command, write_response, Command, CommandType, Response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use tabletdb::schema::{RowKey, Value};
use tabletdb::tablet::ScanBatch;
use tabletdb::{DataType, Schema, TabletError};

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Schema {
    Schema::builder()
        .key_column("id", DataType::Int64)
        .column("name", DataType::String, true)
        .build()
        .unwrap()
}

// =============================================================================
// Command Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_create_table_keeps_column_lookup() {
    let cmd = Command::CreateTable {
        name: "users".to_string(),
        schema: schema(),
    };
    let encoded = encode_command(&cmd).unwrap();
    assert_eq!(encoded[0], CommandType::CreateTable as u8);

    match decode_command(&encoded).unwrap() {
        Command::CreateTable { name, schema: decoded } => {
            assert_eq!(name, "users");
            assert_eq!(decoded.find_column("name"), Some(1));
            assert_eq!(decoded.num_key_columns(), 1);
        }
        other => panic!("Expected CREATE_TABLE command, got {:?}", other),
    }
}

#[test]
fn test_encode_decode_write() {
    let cmd = Command::Write {
        table: "users".to_string(),
        ops: vec![
            RowOperation::insert(RowKey::from(1), vec![(1, Value::from("ada"))]),
            RowOperation::update(RowKey::from(1), vec![(1, Value::Null)]),
            RowOperation::delete(RowKey::from(2)),
        ],
    };
    let encoded = encode_command(&cmd).unwrap();
    assert_eq!(decode_command(&encoded).unwrap(), cmd);
}

#[test]
fn test_encode_decode_scan_commands() {
    for cmd in [
        Command::ScanOpen {
            table: "users".to_string(),
            batch_rows: Some(500),
        },
        Command::ScanNext {
            scanner_id: 7,
            batch_rows: None,
        },
        Command::ScanClose { scanner_id: 7 },
        Command::Ping,
    ] {
        let encoded = encode_command(&cmd).unwrap();
        assert_eq!(encoded[0], cmd.command_type() as u8);
        assert_eq!(decode_command(&encoded).unwrap(), cmd);
    }
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_written_response_carries_row_errors() {
    let resp = Response::Written {
        applied: 2,
        row_errors: vec![(1, WireError::from(&TabletError::AlreadyPresent))],
    };
    let encoded = encode_response(&resp).unwrap();
    assert_eq!(encoded[0], 0x00);

    match decode_response(&encoded).unwrap() {
        Response::Written { applied, row_errors } => {
            assert_eq!(applied, 2);
            assert_eq!(row_errors.len(), 1);
            let (idx, err) = row_errors.into_iter().next().unwrap();
            assert_eq!(idx, 1);
            assert!(matches!(TabletError::from(err), TabletError::AlreadyPresent));
        }
        other => panic!("Expected WRITTEN response, got {:?}", other),
    }
}

#[test]
fn test_scan_response_roundtrip() {
    let resp = Response::Scan(ScanBatch {
        scanner_id: 3,
        rows: vec![
            vec![Value::Int64(1), Value::from("a")],
            vec![Value::Int64(2), Value::Null],
        ],
        has_more: true,
    });
    let encoded = encode_response(&resp).unwrap();
    assert_eq!(decode_response(&encoded).unwrap(), resp);
}

#[test]
fn test_error_response_preserves_scanner_id() {
    let resp = Response::error(&TabletError::ScannerExpired(99));
    let encoded = encode_response(&resp).unwrap();
    assert_eq!(encoded[0], 0x01);

    match decode_response(&encoded).unwrap() {
        Response::Error(err) => {
            assert_eq!(err.code, ErrorCode::ScannerExpired);
            assert!(matches!(TabletError::from(err), TabletError::ScannerExpired(99)));
        }
        other => panic!("Expected ERROR response, got {:?}", other),
    }
}

#[test]
fn test_internal_errors_keep_message() {
    let err = WireError::from(&TabletError::WalCorruption("segment 3".into()));
    assert_eq!(err.code, ErrorCode::Internal);
    assert!(err.message.contains("segment 3"));
}

// =============================================================================
// Malformed Frame Tests
// =============================================================================

#[test]
fn test_incomplete_header() {
    let result = decode_command(&[CommandType::Ping as u8, 0, 0]);
    assert!(matches!(result, Err(TabletError::Protocol(_))));
}

#[test]
fn test_incomplete_payload() {
    let encoded = encode_command(&Command::OpenTable {
        name: "users".to_string(),
    })
    .unwrap();
    let result = decode_command(&encoded[..encoded.len() - 1]);
    assert!(matches!(result, Err(TabletError::Protocol(_))));
}

#[test]
fn test_unknown_command_tag() {
    let mut frame = encode_command(&Command::Ping).unwrap().to_vec();
    frame[0] = 0xFF;
    assert!(matches!(decode_command(&frame), Err(TabletError::Protocol(_))));
}

#[test]
fn test_tag_must_match_payload() {
    let mut frame = encode_command(&Command::ScanClose { scanner_id: 1 }).unwrap().to_vec();
    frame[0] = CommandType::ScanOpen as u8;
    assert!(matches!(decode_command(&frame), Err(TabletError::Protocol(_))));

    let mut frame = encode_response(&Response::Pong).unwrap().to_vec();
    frame[0] = 0x01;
    assert!(matches!(decode_response(&frame), Err(TabletError::Protocol(_))));
}

#[test]
fn test_oversized_length_rejected() {
    let mut frame = vec![CommandType::Ping as u8];
    frame.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
    assert!(matches!(decode_command(&frame), Err(TabletError::Protocol(_))));

    // The stream reader refuses before allocating
    let mut cursor = Cursor::new(frame);
    assert!(matches!(read_command(&mut cursor), Err(TabletError::Protocol(_))));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_reads_frames_in_order() {
    let commands = vec![
        Command::Ping,
        Command::OpenTable {
            name: "users".to_string(),
        },
        Command::ScanNext {
            scanner_id: 4,
            batch_rows: Some(10),
        },
    ];
    let mut buf = Vec::new();
    for cmd in &commands {
        write_command(&mut buf, cmd).unwrap();
    }

    let mut cursor = Cursor::new(buf);
    for cmd in &commands {
        assert_eq!(&read_command(&mut cursor).unwrap(), cmd);
    }
    // Clean EOF surfaces as an I/O error
    assert!(matches!(read_command(&mut cursor), Err(TabletError::Io(_))));
}

#[test]
fn test_stream_response_roundtrip() {
    let mut buf = Vec::new();
    write_response(&mut buf, &Response::Schema(schema())).unwrap();
    write_response(&mut buf, &Response::Closed(true)).unwrap();
    assert!(buf.len() > 2 * HEADER_SIZE);

    let mut cursor = Cursor::new(buf);
    match read_response(&mut cursor).unwrap() {
        Response::Schema(s) => assert_eq!(s.find_column("id"), Some(0)),
        other => panic!("Expected SCHEMA response, got {:?}", other),
    }
    assert_eq!(read_response(&mut cursor).unwrap(), Response::Closed(true));
}
