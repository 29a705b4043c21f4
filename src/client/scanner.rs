//! Client scanner
//!
//! A lazily fetched, non-restartable sequence of rows. `open` pins a
//! snapshot on the server; later writes are never observed. Once
//! exhausted, open a new scanner to read again.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::schema::Row;
use crate::TabletError;

use super::client::Table;
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotOpened,
    /// Server-side scanner still holds rows
    Open { scanner_id: u64 },
    Exhausted,
}

pub struct Scanner {
    transport: Arc<dyn Transport>,
    table: Table,
    batch_rows: Option<usize>,
    state: State,
    /// First batch, returned by `open` together with the scanner id
    prefetched: Option<Vec<Row>>,
}

impl Scanner {
    pub fn new(transport: Arc<dyn Transport>, table: Table) -> Self {
        Self {
            transport,
            table,
            batch_rows: None,
            state: State::NotOpened,
            prefetched: None,
        }
    }

    /// Rows per batch; the server default applies otherwise
    pub fn set_batch_rows(&mut self, rows: usize) {
        self.batch_rows = Some(rows.max(1));
    }

    /// Pin a snapshot and fetch the first batch
    pub fn open(&mut self) -> Result<()> {
        if self.state != State::NotOpened {
            return Err(TabletError::Scan("scanner already opened".to_string()));
        }
        let batch = self.transport.scan_open(self.table.name(), self.batch_rows)?;
        debug!(table = %self.table.name(), scanner_id = batch.scanner_id, rows = batch.rows.len(), "scanner opened");

        self.state = if batch.has_more {
            State::Open {
                scanner_id: batch.scanner_id,
            }
        } else {
            State::Exhausted
        };
        if !batch.rows.is_empty() {
            self.prefetched = Some(self.to_rows(batch.rows));
        }
        Ok(())
    }

    pub fn has_more(&self) -> bool {
        self.prefetched.is_some() || matches!(self.state, State::Open { .. })
    }

    /// The next batch of rows; empty once exhausted
    pub fn next_batch(&mut self) -> Result<Vec<Row>> {
        if let Some(rows) = self.prefetched.take() {
            return Ok(rows);
        }
        let scanner_id = match self.state {
            State::Open { scanner_id } => scanner_id,
            State::Exhausted => return Ok(Vec::new()),
            State::NotOpened => return Err(TabletError::Scan("scanner not opened".to_string())),
        };

        let batch = match self.transport.scan_next(scanner_id, self.batch_rows) {
            Ok(batch) => batch,
            Err(e) => {
                self.state = State::Exhausted;
                return Err(e);
            }
        };
        if !batch.has_more {
            self.state = State::Exhausted;
        }
        Ok(self.to_rows(batch.rows))
    }

    /// Release the server-side scanner early
    pub fn close(&mut self) -> Result<()> {
        self.prefetched = None;
        if let State::Open { scanner_id } = self.state {
            self.state = State::Exhausted;
            self.transport.scan_close(scanner_id)?;
        }
        self.state = State::Exhausted;
        Ok(())
    }

    fn to_rows(&self, rows: Vec<Vec<crate::schema::Value>>) -> Vec<Row> {
        rows.into_iter()
            .map(|values| Row::new(Arc::clone(self.table.schema()), values))
            .collect()
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let State::Open { scanner_id } = self.state {
            let _ = self.transport.scan_close(scanner_id);
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("table", &self.table.name())
            .field("state", &self.state)
            .finish()
    }
}
