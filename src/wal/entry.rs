//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their on-disk
//! framing.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mutation::RowChange;
use crate::schema::RowKey;

/// Header size: LSN (8) + CRC (4) + Len (4) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// Where a logged change was applied, which decides the flush watermark
/// it is checked against during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalTarget {
    MemStore,
    Delta,
}

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number, equal to the tablet sequence number of the change
    pub lsn: u64,

    /// Row the change applies to
    pub key: RowKey,

    /// The change itself
    pub change: RowChange,

    /// Store the change was routed to
    pub target: WalTarget,
}

impl WalEntry {
    pub fn new(lsn: u64, key: RowKey, change: RowChange, target: WalTarget) -> Self {
        Self {
            lsn,
            key,
            change,
            target,
        }
    }

    /// Serialize into the framed on-disk form:
    /// `[LSN: u64][CRC: u32][Len: u32][bincode payload]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let crc = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a payload whose CRC was already checked
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}
