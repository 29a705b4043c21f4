//! Maintenance Scheduler
//!
//! A single background loop that keeps every tablet's memory and read cost
//! bounded. Each tablet registers one op per kind of work:
//!
//! | Op                       | Relieves                                   |
//! |--------------------------|--------------------------------------------|
//! | `FlushMemStoreOp`        | MemStore memory                            |
//! | `FlushDeltasOp`          | DeltaMemStore memory                       |
//! | `MinorDeltaCompactionOp` | number of delta files opened per scan      |
//! | `MajorDeltaCompactionOp` | deltas applied per row on every scan       |
//! | `WalGcOp`                | disk held by WAL segments already flushed  |
//!
//! ## Responsibilities
//! - Score ops from their current stats and run the single best one per tick
//! - Skip ops over the I/O budget or under the minimum benefit
//! - Track consecutive failures and report degraded health
//! - Release retired files and stores once no snapshot references them
//!
//! ## Scheduling
//!
//! Greedy and non-preemptive: an op runs to completion on the maintenance
//! thread before the next tick is considered. Shutdown waits for it.

mod manager;
mod op;
mod ops;

pub use manager::{FailingOp, MaintenanceHealth, MaintenanceManager, OpOutcome};
pub use op::{MaintenanceOp, MaintenanceOpStats};
pub use ops::{
    tablet_ops, FlushDeltasOp, FlushMemStoreOp, MajorDeltaCompactionOp, MinorDeltaCompactionOp,
    WalGcOp,
};
