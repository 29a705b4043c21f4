//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL segments in order.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::TabletError;

use super::reader::{ReadOutcome, WalReader};
use super::segment::{list_segment_ids, segment_path, SegmentInfo};
use super::WalEntry;

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of torn entries cut off the tail
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,

    /// Segments found, ascending, with their max LSN
    pub segments: Vec<SegmentInfo>,
}

impl WalRecovery {
    /// Recover entries from every segment in `dir`
    ///
    /// This will:
    /// 1. Read all valid entries, segment by segment
    /// 2. Truncate a torn tail in the newest segment
    /// 3. Fail with `WalCorruption` if an older segment is damaged
    /// 4. Return all valid entries in LSN order
    pub fn recover(dir: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        Self::scan(dir, true)
    }

    /// Verify integrity of the WAL without modifying it
    pub fn verify(dir: &Path) -> Result<RecoveryResult> {
        Self::scan(dir, false).map(|(_, result)| result)
    }

    fn scan(dir: &Path, repair: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let ids = list_segment_ids(dir)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        for (pos, id) in ids.iter().enumerate() {
            let path = segment_path(dir, *id);
            let is_last = pos + 1 == ids.len();
            let mut reader = WalReader::open(&path)?;
            let mut max_lsn = 0;

            loop {
                match reader.next_entry()? {
                    ReadOutcome::Entry(entry) => {
                        if entry.lsn <= result.last_lsn {
                            return Err(TabletError::WalCorruption(format!(
                                "lsn {} in segment {} is not above {}",
                                entry.lsn, id, result.last_lsn
                            )));
                        }
                        result.last_lsn = entry.lsn;
                        max_lsn = entry.lsn;
                        result.entries_recovered += 1;
                        entries.push(entry);
                    }
                    ReadOutcome::Eof => break,
                    ReadOutcome::Torn { offset, reason } => {
                        if !is_last {
                            return Err(TabletError::WalCorruption(format!(
                                "segment {} damaged at offset {}: {}",
                                id, offset, reason
                            )));
                        }
                        warn!(segment = id, offset, %reason, "torn WAL tail");
                        result.entries_corrupted += 1;
                        if repair {
                            let file = OpenOptions::new().write(true).open(&path)?;
                            file.set_len(offset)?;
                            file.sync_all()?;
                            result.was_truncated = true;
                        }
                        break;
                    }
                }
            }

            result.segments.push(SegmentInfo {
                id: *id,
                path,
                max_lsn,
            });
        }

        debug!(
            segments = result.segments.len(),
            entries = result.entries_recovered,
            last_lsn = result.last_lsn,
            "WAL scan complete"
        );
        Ok((entries, result))
    }
}
