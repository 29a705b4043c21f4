//! Status synchronizer
//!
//! Bridges a callback-style completion (`StatusCallback`) to a blocking
//! wait. Used by callers pipelining session flushes: wait on the previous
//! flush, `reset()`, then hand a fresh callback to the next flush.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::TabletError;

/// Completion callback receiving the aggregate status of an operation
pub type StatusCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Reusable completion token
#[derive(Clone, Default)]
pub struct Synchronizer {
    inner: Arc<State>,
}

#[derive(Default)]
struct State {
    status: Mutex<Option<Result<()>>>,
    done: Condvar,
}

impl Synchronizer {
    /// A pending synchronizer
    pub fn new() -> Self {
        Self::default()
    }

    /// A synchronizer already resolved with success, so the first `wait`
    /// in a wait-then-flush loop returns immediately.
    pub fn resolved() -> Self {
        let sync = Self::new();
        sync.status_cb(Ok(()));
        sync
    }

    /// Record a status and wake waiters. A second status before `reset`
    /// is ignored.
    pub fn status_cb(&self, status: Result<()>) {
        let mut slot = self.inner.status.lock();
        if slot.is_none() {
            *slot = Some(status);
            self.inner.done.notify_all();
        }
    }

    /// A boxed callback that resolves this synchronizer
    pub fn callback(&self) -> StatusCallback {
        let sync = self.clone();
        Box::new(move |status| sync.status_cb(status))
    }

    /// Block until a status is recorded and return it
    pub fn wait(&self) -> Result<()> {
        let mut slot = self.inner.status.lock();
        loop {
            if let Some(status) = slot.as_ref() {
                return status.clone();
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Like `wait`, failing with `TimedOut` after `timeout`
    pub fn wait_for(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.status.lock();
        loop {
            if let Some(status) = slot.as_ref() {
                return status.clone();
            }
            if self.inner.done.wait_until(&mut slot, deadline).timed_out() && slot.is_none() {
                return Err(TabletError::TimedOut(format!(
                    "synchronizer not resolved within {:?}",
                    timeout
                )));
            }
        }
    }

    /// Clear the recorded status so the synchronizer can be reused
    pub fn reset(&self) {
        *self.inner.status.lock() = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.status.lock().is_some()
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
