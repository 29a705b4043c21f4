//! Sorted File Module
//!
//! Immutable on-disk sorted `RowKey → record` storage. Base rowsets and
//! delta units share this layout and differ only in their magic bytes and
//! record type.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic (4) | Version: u16 (2) | Count: u64 (8)         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry, key order ...            │
//! │   (Key and Value are bincode payloads)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! │   ... repeated for each entry ...                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Padding (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

pub use builder::SortedFileBuilder;
pub use iterator::SortedFileIterator;
pub use reader::SortedFileReader;

use crate::schema::RowKey;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes of a base rowset file
pub const BASE_MAGIC: &[u8; 4] = b"TBAS";

/// Magic bytes of a delta unit file
pub const DELTA_MAGIC: &[u8; 4] = b"TDLT";

/// Current file format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + DataCRC (4) + Padding (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

// =============================================================================
// File Metadata
// =============================================================================

/// Summary returned when a file is finished
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: PathBuf,
    pub entry_count: u64,
    pub min_key: Option<RowKey>,
    pub max_key: Option<RowKey>,
    pub file_size: u64,
}

/// Read a little-endian u32 at `pos`
pub(crate) fn le_u32(buf: &[u8], pos: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(b)
}

/// Read a little-endian u64 at `pos`
pub(crate) fn le_u64(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(b)
}
