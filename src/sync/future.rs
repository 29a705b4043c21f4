//! One-shot promise / shared future
//!
//! A single-assignment cell. The `Promise` is the only mutator and is
//! consumed by `set`, so a value can be published at most once. Any number
//! of `SharedFuture` clones may wait on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Cell<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Cell<T> {
    fn publish(&self, value: T) {
        let mut slot = self.value.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.ready.notify_all();
        }
    }
}

/// Create a connected promise/future pair.
///
/// `on_broken` is published if the promise is dropped without being set,
/// so waiters never hang on an abandoned producer.
pub fn promise<T: Clone>(on_broken: T) -> (Promise<T>, SharedFuture<T>) {
    let cell = Arc::new(Cell {
        value: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Promise {
            cell: Some(Arc::clone(&cell)),
            on_broken: Some(on_broken),
        },
        SharedFuture { cell },
    )
}

/// Write side of the handoff
pub struct Promise<T> {
    cell: Option<Arc<Cell<T>>>,
    on_broken: Option<T>,
}

impl<T> Promise<T> {
    /// Resolve the future. Consumes the promise.
    pub fn set(mut self, value: T) {
        if let Some(cell) = self.cell.take() {
            cell.publish(value);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let (Some(cell), Some(value)) = (self.cell.take(), self.on_broken.take()) {
            cell.publish(value);
        }
    }
}

/// Read side of the handoff; cheap to clone
pub struct SharedFuture<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> SharedFuture<T> {
    /// A future that is already resolved with `value`
    pub fn ready(value: T) -> Self {
        Self {
            cell: Arc::new(Cell {
                value: Mutex::new(Some(value)),
                ready: Condvar::new(),
            }),
        }
    }

    /// Block until resolved and return the value
    pub fn wait(&self) -> T {
        let mut slot = self.cell.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.cell.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.cell.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.cell.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().cloned();
            }
        }
    }

    /// Non-blocking read
    pub fn try_get(&self) -> Option<T> {
        self.cell.value.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.value.lock().is_some()
    }
}
