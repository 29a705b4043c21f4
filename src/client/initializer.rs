//! Async client bootstrap
//!
//! Builds a `Client` once on a dedicated thread while callers carry on.
//! The thread is the only writer of a one-shot `SharedFuture`; every
//! caller of `client()` or `get_future()` observes the same outcome and
//! none of them triggers another construction.
//!
//! ```text
//!   start ──► spawn bootstrap thread ──► build ──fail──► backoff ──► build ...
//!     │                                    │                 ▲
//!     │                                   ok            shutdown()
//!     ▼                                    ▼                 │
//!   client() ─── wait ───────────► SharedFuture ◄── Cancelled
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::sync::{promise, SharedFuture, ShutdownSignal};
use crate::util::backoff::BackoffPolicy;
use crate::TabletError;

use super::client::{BuildClient, Client};

pub struct AsyncClientInitializer {
    future: SharedFuture<Result<Client>>,
    stop: ShutdownSignal,
    attempts: Arc<AtomicU32>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncClientInitializer {
    /// Start constructing a client in the background.
    ///
    /// Retryable failures are retried per `backoff`; anything else, or
    /// running out of attempts, resolves the future with
    /// `TabletError::Initialization`. `shutdown` before success resolves
    /// it with `TabletError::Cancelled`.
    pub fn start<B: BuildClient>(builder: B, backoff: BackoffPolicy) -> Self {
        let (done, future) = promise(Err(TabletError::Initialization(
            "bootstrap thread exited without a result".to_string(),
        )));
        let stop = ShutdownSignal::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let spawned = {
            let stop = stop.clone();
            let attempts = Arc::clone(&attempts);
            thread::Builder::new()
                .name("client-bootstrap".to_string())
                .spawn(move || {
                    let result = backoff.retry(Some(&stop), |_| {
                        attempts.fetch_add(1, Ordering::AcqRel);
                        builder.build()
                    });
                    let result = match result {
                        Ok(client) => {
                            info!(attempts = attempts.load(Ordering::Acquire), "client ready");
                            Ok(client)
                        }
                        Err(TabletError::Cancelled) => {
                            warn!("client bootstrap cancelled");
                            Err(TabletError::Cancelled)
                        }
                        Err(e) => {
                            error!(error = %e, "client bootstrap failed");
                            Err(TabletError::Initialization(e.to_string()))
                        }
                    };
                    done.set(result);
                })
        };
        // On spawn failure the promise is dropped, which resolves the
        // future with the broken-promise error
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn bootstrap thread");
                None
            }
        };

        Self {
            future,
            stop,
            attempts,
            handle: Mutex::new(handle),
        }
    }

    /// Block until construction finishes
    pub fn client(&self) -> Result<Client> {
        self.future.wait()
    }

    pub fn get_future(&self) -> SharedFuture<Result<Client>> {
        self.future.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.future.is_ready()
    }

    /// Construction attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Ask the bootstrap thread to stop at its next retry boundary and
    /// wait for it. An attempt already running is not interrupted; if it
    /// fails, waiters still see `Cancelled`.
    pub fn shutdown(&self) {
        self.stop.shutdown();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("bootstrap thread panicked");
            }
        }
    }
}

impl Drop for AsyncClientInitializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncClientInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClientInitializer")
            .field("ready", &self.is_ready())
            .field("attempts", &self.attempts())
            .finish()
    }
}
