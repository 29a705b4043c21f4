//! Bounded exponential backoff
//!
//! Shared by the flush retry loop and the client bootstrap. The delay for
//! attempt `n` (0-based) is `initial * multiplier^n`, capped at `max`.

use std::time::Duration;

use crate::error::Result;
use crate::sync::ShutdownSignal;
use crate::TabletError;

/// Retry cadence for transient failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (milliseconds)
    pub initial_ms: u64,
    /// Upper bound on any single delay (milliseconds)
    pub max_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Total attempts including the first; `None` retries until cancelled
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            max_ms: 5_000,
            multiplier: 2.0,
            max_attempts: Some(5),
        }
    }
}

impl BackoffPolicy {
    /// A policy that never waits and tries exactly `attempts` times
    pub fn immediate(attempts: u32) -> Self {
        Self {
            initial_ms: 0,
            max_ms: 0,
            multiplier: 1.0,
            max_attempts: Some(attempts),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let ms = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn allows(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts
    /// or `stop` fires.
    ///
    /// Only errors for which `TabletError::is_retryable` holds are retried.
    /// A stop observed at a retry boundary, or raised while a failing
    /// attempt was running, returns `TabletError::Cancelled`.
    pub fn retry<T, F>(&self, stop: Option<&ShutdownSignal>, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            if stop.map(|s| s.is_shutdown()).unwrap_or(false) {
                return Err(TabletError::Cancelled);
            }

            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            // A stop raised while the attempt ran wins over its error
            if stop.map(|s| s.is_shutdown()).unwrap_or(false) {
                return Err(TabletError::Cancelled);
            }

            attempt += 1;
            if !err.is_retryable() || !self.allows(attempt) {
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transient failure");

            let stopped = match stop {
                Some(signal) => signal.wait_timeout(delay),
                None => {
                    std::thread::sleep(delay);
                    false
                }
            };
            if stopped {
                return Err(TabletError::Cancelled);
            }
        }
    }
}
