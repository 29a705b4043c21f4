//! Error types for tabletdb
//!
//! Provides a unified error type for all operations, plus the flattened
//! form used to carry errors across the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using TabletError
pub type Result<T> = std::result::Result<T, TabletError>;

/// Unified error type for tabletdb operations
#[derive(Debug, Error)]
pub enum TabletError {
    // -------------------------------------------------------------------------
    // Caller Errors (rejected before buffering, never retried)
    // -------------------------------------------------------------------------
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid primary key: {0}")]
    InvalidPrimaryKey(String),

    // -------------------------------------------------------------------------
    // Per-Row Apply Errors
    // -------------------------------------------------------------------------
    #[error("Row already present")]
    AlreadyPresent,

    #[error("Row not found")]
    NotFound,

    #[error("Flush completed with {failed} of {total} row errors")]
    PartialFlush { failed: usize, total: usize },

    // -------------------------------------------------------------------------
    // Background Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("Flush failed: {0}")]
    Flush(String),

    #[error("Compaction failed: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // Scan Errors
    // -------------------------------------------------------------------------
    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Scanner {0} expired or unknown")]
    ScannerExpired(u64),

    // -------------------------------------------------------------------------
    // Client Bootstrap Errors
    // -------------------------------------------------------------------------
    #[error("Client initialization failed: {0}")]
    Initialization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out: {0}")]
    TimedOut(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration / Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutting down")]
    ShuttingDown,
}

impl TabletError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Only transport and I/O conditions qualify; caller-input errors and
    /// corruption are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            TabletError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::AddrNotAvailable
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TabletError::Network(_) | TabletError::TimedOut(_) | TabletError::Flush(_) => true,
            _ => false,
        }
    }
}

// Shared futures hand the same outcome to every waiter, so errors must be
// clonable. io::Error is not; its kind and message are preserved instead.
impl Clone for TabletError {
    fn clone(&self) -> Self {
        match self {
            TabletError::SchemaMismatch(m) => TabletError::SchemaMismatch(m.clone()),
            TabletError::InvalidPrimaryKey(m) => TabletError::InvalidPrimaryKey(m.clone()),
            TabletError::AlreadyPresent => TabletError::AlreadyPresent,
            TabletError::NotFound => TabletError::NotFound,
            TabletError::PartialFlush { failed, total } => TabletError::PartialFlush {
                failed: *failed,
                total: *total,
            },
            TabletError::Flush(m) => TabletError::Flush(m.clone()),
            TabletError::Compaction(m) => TabletError::Compaction(m.clone()),
            TabletError::Scan(m) => TabletError::Scan(m.clone()),
            TabletError::ScannerExpired(id) => TabletError::ScannerExpired(*id),
            TabletError::Initialization(m) => TabletError::Initialization(m.clone()),
            TabletError::Cancelled => TabletError::Cancelled,
            TabletError::TimedOut(m) => TabletError::TimedOut(m.clone()),
            TabletError::Io(e) => TabletError::Io(std::io::Error::new(e.kind(), e.to_string())),
            TabletError::WalCorruption(m) => TabletError::WalCorruption(m.clone()),
            TabletError::Storage(m) => TabletError::Storage(m.clone()),
            TabletError::TableNotFound(m) => TabletError::TableNotFound(m.clone()),
            TabletError::TableExists(m) => TabletError::TableExists(m.clone()),
            TabletError::Serialization(m) => TabletError::Serialization(m.clone()),
            TabletError::Network(m) => TabletError::Network(m.clone()),
            TabletError::Protocol(m) => TabletError::Protocol(m.clone()),
            TabletError::Config(m) => TabletError::Config(m.clone()),
            TabletError::ShuttingDown => TabletError::ShuttingDown,
        }
    }
}

impl From<bincode::Error> for TabletError {
    fn from(e: bincode::Error) -> Self {
        TabletError::Serialization(e.to_string())
    }
}

// =============================================================================
// Wire Representation
// =============================================================================

/// Stable error codes carried in protocol responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    SchemaMismatch,
    InvalidPrimaryKey,
    AlreadyPresent,
    NotFound,
    Flush,
    Compaction,
    Scan,
    ScannerExpired,
    TableNotFound,
    TableExists,
    TimedOut,
    ShuttingDown,
    Internal,
}

/// An error flattened for transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    /// Scanner id for `ScannerExpired`
    pub scanner_id: Option<u64>,
}

impl From<&TabletError> for WireError {
    fn from(e: &TabletError) -> Self {
        let (code, message, scanner_id) = match e {
            TabletError::SchemaMismatch(m) => (ErrorCode::SchemaMismatch, m.clone(), None),
            TabletError::InvalidPrimaryKey(m) => (ErrorCode::InvalidPrimaryKey, m.clone(), None),
            TabletError::AlreadyPresent => (ErrorCode::AlreadyPresent, String::new(), None),
            TabletError::NotFound => (ErrorCode::NotFound, String::new(), None),
            TabletError::Flush(m) => (ErrorCode::Flush, m.clone(), None),
            TabletError::Compaction(m) => (ErrorCode::Compaction, m.clone(), None),
            TabletError::Scan(m) => (ErrorCode::Scan, m.clone(), None),
            TabletError::ScannerExpired(id) => (ErrorCode::ScannerExpired, String::new(), Some(*id)),
            TabletError::TableNotFound(m) => (ErrorCode::TableNotFound, m.clone(), None),
            TabletError::TableExists(m) => (ErrorCode::TableExists, m.clone(), None),
            TabletError::TimedOut(m) => (ErrorCode::TimedOut, m.clone(), None),
            TabletError::ShuttingDown => (ErrorCode::ShuttingDown, String::new(), None),
            other => (ErrorCode::Internal, other.to_string(), None),
        };
        Self {
            code,
            message,
            scanner_id,
        }
    }
}

impl From<WireError> for TabletError {
    fn from(e: WireError) -> Self {
        match e.code {
            ErrorCode::SchemaMismatch => TabletError::SchemaMismatch(e.message),
            ErrorCode::InvalidPrimaryKey => TabletError::InvalidPrimaryKey(e.message),
            ErrorCode::AlreadyPresent => TabletError::AlreadyPresent,
            ErrorCode::NotFound => TabletError::NotFound,
            ErrorCode::Flush => TabletError::Flush(e.message),
            ErrorCode::Compaction => TabletError::Compaction(e.message),
            ErrorCode::Scan => TabletError::Scan(e.message),
            ErrorCode::ScannerExpired => TabletError::ScannerExpired(e.scanner_id.unwrap_or(0)),
            ErrorCode::TableNotFound => TabletError::TableNotFound(e.message),
            ErrorCode::TableExists => TabletError::TableExists(e.message),
            ErrorCode::TimedOut => TabletError::TimedOut(e.message),
            ErrorCode::ShuttingDown => TabletError::ShuttingDown,
            ErrorCode::Internal => TabletError::Storage(e.message),
        }
    }
}
