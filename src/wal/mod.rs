//! Write-ahead log
//!
//! Every row change of a committed batch is appended here, one entry per
//! change, before it reaches the MemStore or DeltaMemStore. The entry's LSN
//! is the tablet sequence number of the change, so replay after a crash
//! rebuilds exactly the state that was acknowledged.
//!
//! The log is split into numbered segments (`wal/wal_000001.log`, ...). A
//! segment whose highest LSN is already covered by flushed stores can be
//! deleted; the active segment is rolled first when it is fully covered.
//!
//! ## Entry layout
//! ```text
//! +----------+----------+-----------+------------------------+
//! | lsn: u64 | crc: u32 | len: u32  | bincode(WalEntry)      |
//! +----------+----------+-----------+------------------------+
//! ```
//! The CRC covers the payload. A short or mismatching tail is treated as a
//! torn write and truncated during recovery.

mod entry;
mod reader;
mod recovery;
mod segment;
mod writer;

pub use entry::{WalEntry, WalTarget, HEADER_SIZE};
pub use reader::{ReadOutcome, WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use segment::{list_segment_ids, parse_segment_id, segment_path, SegmentInfo};
pub use writer::WalWriter;
