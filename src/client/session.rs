//! Write session
//!
//! Buffers mutations on the caller's thread and sends them in batches on a
//! dedicated flush worker. At most one flush is outstanding at a time:
//!
//! ```text
//!   apply ──► buffer ──flush_async──► [wait previous flush] ──► channel ──► worker
//!                ▲                                                          │
//!                └─────────── keeps filling while the worker sends ─────────┘
//! ```
//!
//! Memory held by in-flight data is therefore bounded by two buffers: the
//! one draining on the worker and the one filling on the caller.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::mutation::{Mutation, RowOperation};
use crate::sync::{promise, Promise, SharedFuture, StatusCallback};
use crate::TabletError;

use super::transport::Transport;

/// When buffered mutations are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Only on `flush_async` / `flush_sync` / `close`
    #[default]
    ManualFlush,
    /// `apply` flushes synchronously once a buffer limit is crossed
    AutoFlushSync,
    /// `apply` starts a background flush once a buffer limit is crossed
    AutoFlushBackground,
}

/// A mutation that failed in a completed flush
#[derive(Debug, Clone)]
pub struct RowError {
    pub table: String,
    pub operation: RowOperation,
    pub error: TabletError,
}

/// Counters observed by tests and diagnostics
#[derive(Debug, Default)]
pub struct SessionStats {
    flushes: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SessionStats {
    /// Non-empty flushes handed to the worker
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    /// Highest number of flushes ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn flush_started(&self) {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn flush_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

type FlushResult = Result<()>;

struct FlushJob {
    ops: Vec<(String, RowOperation)>,
    done: Promise<FlushResult>,
    callback: StatusCallback,
}

const DEFAULT_BUFFER_SPACE: usize = 7 * 1024 * 1024;
const DEFAULT_MAX_BUFFERED: usize = 10_000;

/// Client-side buffer of pending mutations
///
/// Not meant to be shared between threads; use one session per writer.
pub struct WriteSession {
    flush_mode: FlushMode,
    timeout: Duration,
    buffer_space: usize,
    max_buffered: usize,

    buffer: Vec<(String, RowOperation)>,
    buffer_bytes: usize,

    /// Completion of the last flush handed to the worker
    outstanding: Option<SharedFuture<FlushResult>>,
    errors: Arc<Mutex<Vec<RowError>>>,
    stats: Arc<SessionStats>,

    jobs: Option<Sender<FlushJob>>,
    worker: Option<JoinHandle<()>>,
}

impl WriteSession {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        let (tx, rx) = channel::bounded::<FlushJob>(1);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(SessionStats::default());

        let worker = {
            let errors = Arc::clone(&errors);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("session-flush".to_string())
                .spawn(move || run_worker(transport, rx, errors, stats))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to start flush worker");
                None
            }
        };

        Self {
            flush_mode: FlushMode::default(),
            timeout,
            buffer_space: DEFAULT_BUFFER_SPACE,
            max_buffered: DEFAULT_MAX_BUFFERED,
            buffer: Vec::new(),
            buffer_bytes: 0,
            outstanding: None,
            errors,
            stats,
            jobs: worker.as_ref().map(|_| tx),
            worker,
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Change the flush mode. Fails if mutations are buffered.
    pub fn set_flush_mode(&mut self, mode: FlushMode) -> Result<()> {
        if !self.buffer.is_empty() {
            return Err(TabletError::Config(
                "cannot change flush mode with buffered mutations".to_string(),
            ));
        }
        self.flush_mode = mode;
        Ok(())
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    /// Timeout for `flush_sync`; 0 waits forever
    pub fn set_timeout_ms(&mut self, ms: u64) {
        self.timeout = Duration::from_millis(ms);
    }

    /// Buffer size limit (bytes)
    pub fn set_mutation_buffer_space(&mut self, bytes: usize) {
        self.buffer_space = bytes.max(1);
    }

    /// Buffer length limit (mutations)
    pub fn set_max_buffered_mutations(&mut self, count: usize) {
        self.max_buffered = count.max(1);
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Validate and buffer a mutation.
    ///
    /// Schema and key errors are returned immediately and nothing is
    /// buffered. In manual mode a full buffer is an error; the automatic
    /// modes flush instead.
    pub fn apply(&mut self, mutation: Mutation) -> Result<()> {
        if self.jobs.is_none() {
            return Err(TabletError::ShuttingDown);
        }
        let op = mutation.to_operation()?;
        let size = op.approx_size();

        if self.flush_mode == FlushMode::ManualFlush && self.would_overflow(size) {
            return Err(TabletError::Flush(format!(
                "mutation buffer full ({} mutations, {} bytes); flush first",
                self.buffer.len(),
                self.buffer_bytes
            )));
        }

        self.buffer.push((mutation.table().to_string(), op));
        self.buffer_bytes += size;

        if self.buffer.len() >= self.max_buffered || self.buffer_bytes >= self.buffer_space {
            match self.flush_mode {
                FlushMode::ManualFlush => {}
                FlushMode::AutoFlushSync => return self.flush_sync(),
                FlushMode::AutoFlushBackground => self.flush_async(Box::new(|_| {}))?,
            }
        }
        Ok(())
    }

    fn would_overflow(&self, size: usize) -> bool {
        self.buffer.len() + 1 > self.max_buffered
            || (!self.buffer.is_empty() && self.buffer_bytes + size > self.buffer_space)
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Hand every buffered mutation to the worker as one batch.
    ///
    /// Waits for the previous flush first if it is still running.
    /// `on_complete` runs exactly once with the batch's aggregate status;
    /// for an empty buffer it runs immediately with success.
    pub fn flush_async(&mut self, on_complete: StatusCallback) -> Result<()> {
        let Some(jobs) = self.jobs.as_ref() else {
            on_complete(Err(TabletError::ShuttingDown));
            return Err(TabletError::ShuttingDown);
        };

        if self.buffer.is_empty() {
            on_complete(Ok(()));
            return Ok(());
        }

        if let Some(previous) = self.outstanding.take() {
            // Its outcome went to its own callback
            let _ = previous.wait();
        }

        let ops = std::mem::take(&mut self.buffer);
        self.buffer_bytes = 0;
        let (done, future) = promise(Err(TabletError::Flush("flush worker stopped".to_string())));

        self.stats.flush_started();
        debug!(mutations = ops.len(), "flush issued");
        let job = FlushJob {
            ops,
            done,
            callback: on_complete,
        };
        if let Err(channel::SendError(job)) = jobs.send(job) {
            self.stats.flush_finished();
            let err = TabletError::Flush("flush worker stopped".to_string());
            (job.callback)(Err(err.clone()));
            return Err(err);
        }
        self.outstanding = Some(future);
        Ok(())
    }

    /// Flush and wait for the result
    pub fn flush_sync(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return self.wait_outstanding();
        }
        self.flush_async(Box::new(|_| {}))?;
        self.wait_outstanding()
    }

    /// Wait for the outstanding flush, if any
    fn wait_outstanding(&mut self) -> Result<()> {
        let Some(future) = self.outstanding.as_ref() else {
            return Ok(());
        };
        let result = if self.timeout.is_zero() {
            future.wait()
        } else {
            future.wait_timeout(self.timeout).ok_or_else(|| {
                TabletError::TimedOut(format!("flush not complete within {:?}", self.timeout))
            })?
        };
        self.outstanding = None;
        result
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Buffered mutations or a flush still running
    pub fn has_pending_operations(&self) -> bool {
        !self.buffer.is_empty() || self.outstanding.as_ref().map(|f| !f.is_ready()).unwrap_or(false)
    }

    pub fn count_buffered_operations(&self) -> usize {
        self.buffer.len()
    }

    /// Take the row errors collected from completed flushes
    pub fn pending_errors(&self) -> Vec<RowError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn count_pending_errors(&self) -> usize {
        self.errors.lock().len()
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Flush everything, then stop the worker
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush_sync();
        self.stop_worker();
        flushed
    }

    fn stop_worker(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("flush worker panicked");
            }
        }
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            warn!(discarded = self.buffer.len(), "write session dropped with buffered mutations");
        }
        self.stop_worker();
    }
}

impl std::fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("flush_mode", &self.flush_mode)
            .field("buffered", &self.buffer.len())
            .field("flushes", &self.stats.flushes())
            .finish()
    }
}

// =============================================================================
// Flush Worker
// =============================================================================

fn run_worker(
    transport: Arc<dyn Transport>,
    jobs: Receiver<FlushJob>,
    errors: Arc<Mutex<Vec<RowError>>>,
    stats: Arc<SessionStats>,
) {
    for job in jobs.iter() {
        let result = send_batch(transport.as_ref(), job.ops, &errors);
        stats.flush_finished();
        // Resolve before the callback so a caller woken by the callback
        // never sees this flush as outstanding
        job.done.set(result.clone());
        (job.callback)(result);
    }
}

/// Send ops grouped into runs of the same table, preserving order
fn send_batch(
    transport: &dyn Transport,
    ops: Vec<(String, RowOperation)>,
    errors: &Mutex<Vec<RowError>>,
) -> FlushResult {
    let total = ops.len();
    let mut failed = 0usize;
    let mut first_error: Option<TabletError> = None;

    let mut rest = ops.into_iter().peekable();
    while let Some((table, first)) = rest.next() {
        let mut run = vec![first];
        while let Some((_, op)) = rest.next_if(|(t, _)| *t == table) {
            run.push(op);
        }

        match transport.write(&table, run.clone()) {
            Ok(outcome) => {
                if outcome.row_errors.is_empty() {
                    continue;
                }
                failed += outcome.row_errors.len();
                let mut collected = errors.lock();
                for (idx, error) in outcome.row_errors {
                    if let Some(operation) = run.get(idx) {
                        collected.push(RowError {
                            table: table.clone(),
                            operation: operation.clone(),
                            error,
                        });
                    }
                }
            }
            Err(e) => {
                warn!(table = %table, rows = run.len(), error = %e, "flush failed");
                failed += run.len();
                let mut collected = errors.lock();
                for operation in run {
                    collected.push(RowError {
                        table: table.clone(),
                        operation,
                        error: e.clone(),
                    });
                }
                first_error.get_or_insert(e);
            }
        }
    }

    match (failed, first_error) {
        (0, _) => Ok(()),
        (n, Some(e)) if n == total => Err(e),
        (n, _) => Err(TabletError::PartialFlush { failed: n, total }),
    }
}
