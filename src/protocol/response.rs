//! Response definitions
//!
//! Represents responses to clients.

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::schema::Schema;
use crate::tablet::ScanBatch;

/// Response status codes (the frame tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Table schema, for CreateTable and OpenTable
    Schema(Schema),

    /// Outcome of a Write; row errors are indexed by batch position
    Written {
        applied: u32,
        row_errors: Vec<(u32, WireError)>,
    },

    /// Rows for ScanOpen and ScanNext
    Scan(ScanBatch),

    /// Whether ScanClose found the scanner
    Closed(bool),

    Pong,

    /// The whole request failed
    Error(WireError),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Error(_) => Status::Error,
            _ => Status::Ok,
        }
    }

    /// Create an ERROR response
    pub fn error(err: &crate::TabletError) -> Self {
        Response::Error(WireError::from(err))
    }
}
