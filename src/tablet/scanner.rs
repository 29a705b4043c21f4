//! Server-side scanner
//!
//! A `TabletScanner` holds the version and sequence number it was opened
//! at. Rows are merged lazily from that version in key order and folded at
//! the pinned sequence number, so writes, flushes and compactions that
//! happen afterwards are never observed.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::schema::{Schema, Value};
use crate::status::PendingGuard;
use crate::TabletError;

use super::merge::MergingIterator;
use super::version::TabletVersion;

pub struct TabletScanner {
    schema: Arc<Schema>,
    snapshot_seq: u64,
    /// Dropped on exhaustion, releasing the pinned files
    state: Option<ScanState>,
    lookahead: Option<Vec<Value>>,
    rows_returned: u64,
}

struct ScanState {
    _version: Arc<TabletVersion>,
    merged: MergingIterator,
    _guard: PendingGuard,
}

impl TabletScanner {
    /// Pin `version` at `snapshot_seq` and position on the first row
    pub fn open(
        schema: Arc<Schema>,
        version: Arc<TabletVersion>,
        snapshot_seq: u64,
        guard: PendingGuard,
    ) -> Result<Self> {
        let merged = version.merge_all().map_err(into_scan_error)?;
        let mut scanner = Self {
            schema,
            snapshot_seq,
            state: Some(ScanState {
                _version: version,
                merged,
                _guard: guard,
            }),
            lookahead: None,
            rows_returned: 0,
        };
        scanner.lookahead = scanner.advance()?;
        Ok(scanner)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn snapshot_seq(&self) -> u64 {
        self.snapshot_seq
    }

    pub fn rows_returned(&self) -> u64 {
        self.rows_returned
    }

    /// Whether another call to `next_batch` can return rows
    pub fn has_more(&self) -> bool {
        self.lookahead.is_some()
    }

    /// Return up to `max_rows` rows in key order.
    ///
    /// If `deadline` passes after at least one row is ready, the rows
    /// gathered so far are returned.
    pub fn next_batch(&mut self, max_rows: usize, deadline: Option<Instant>) -> Result<Vec<Vec<Value>>> {
        let mut batch = Vec::new();
        while batch.len() < max_rows.max(1) {
            let Some(row) = self.lookahead.take() else {
                break;
            };
            batch.push(row);
            self.lookahead = self.advance()?;

            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                break;
            }
        }
        self.rows_returned += batch.len() as u64;
        Ok(batch)
    }

    /// Next visible row, skipping dead and not-yet-visible keys
    fn advance(&mut self) -> Result<Option<Vec<Value>>> {
        let snapshot = self.snapshot_seq;
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let found = loop {
            match state.merged.next() {
                Some(Ok((_, history))) => {
                    if let Some(values) = history.fold(snapshot) {
                        break Ok(Some(values));
                    }
                }
                Some(Err(e)) => break Err(into_scan_error(e)),
                None => break Ok(None),
            }
        };
        if !matches!(found, Ok(Some(_))) {
            self.state = None;
        }
        found
    }
}

impl std::fmt::Debug for TabletScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletScanner")
            .field("snapshot_seq", &self.snapshot_seq)
            .field("rows_returned", &self.rows_returned)
            .field("has_more", &self.has_more())
            .finish()
    }
}

fn into_scan_error(e: TabletError) -> TabletError {
    match e {
        TabletError::Scan(_) => e,
        other => TabletError::Scan(other.to_string()),
    }
}
