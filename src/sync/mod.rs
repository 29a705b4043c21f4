//! Synchronization Module
//!
//! Completion handoff between asynchronous operations and their waiters.
//!
//! ## Responsibilities
//! - One-shot promise/future pair resolved exactly once
//! - Reusable status synchronizer for pipelined flushes
//! - Cooperative shutdown signal for background loops
//!
//! ## Shape
//! ```text
//!   producer                         consumers
//!  ┌─────────┐   set(value)    ┌──────────────────┐
//!  │ Promise │ ──────────────▶ │ SharedFuture (N) │ wait() / try_get()
//!  └─────────┘                 └──────────────────┘
//! ```

mod future;
mod shutdown;
mod synchronizer;

pub use future::{promise, Promise, SharedFuture};
pub use shutdown::ShutdownSignal;
pub use synchronizer::{StatusCallback, Synchronizer};
