//! Command definitions
//!
//! Requests a client sends to a tablet server.

use serde::{Deserialize, Serialize};

use crate::mutation::RowOperation;
use crate::schema::Schema;

/// Command types (the frame tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    CreateTable = 0x01,
    OpenTable = 0x02,
    Write = 0x03,
    ScanOpen = 0x04,
    ScanNext = 0x05,
    ScanClose = 0x06,
    Ping = 0x07,
}

impl CommandType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(CommandType::CreateTable),
            0x02 => Some(CommandType::OpenTable),
            0x03 => Some(CommandType::Write),
            0x04 => Some(CommandType::ScanOpen),
            0x05 => Some(CommandType::ScanNext),
            0x06 => Some(CommandType::ScanClose),
            0x07 => Some(CommandType::Ping),
            _ => None,
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Create a table with the given schema
    CreateTable { name: String, schema: Schema },

    /// Fetch an existing table's schema
    OpenTable { name: String },

    /// Apply a batch of row operations, in order
    Write { table: String, ops: Vec<RowOperation> },

    /// Open a scanner and fetch its first batch
    ScanOpen { table: String, batch_rows: Option<u32> },

    /// Fetch the next batch of an open scanner
    ScanNext { scanner_id: u64, batch_rows: Option<u32> },

    /// Release an open scanner
    ScanClose { scanner_id: u64 },

    /// Ping (health check)
    Ping,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::CreateTable { .. } => CommandType::CreateTable,
            Command::OpenTable { .. } => CommandType::OpenTable,
            Command::Write { .. } => CommandType::Write,
            Command::ScanOpen { .. } => CommandType::ScanOpen,
            Command::ScanNext { .. } => CommandType::ScanNext,
            Command::ScanClose { .. } => CommandType::ScanClose,
            Command::Ping => CommandType::Ping,
        }
    }
}
