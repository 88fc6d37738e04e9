//! Persistence log.
//!
//! The log is an append-only sequence of CRC-framed records. Each committed
//! write transaction becomes exactly one [`LogRecord::Commit`] holding all of
//! its operations, so a commit is either wholly in the log or not at all.
//!
//! On open the log is replayed front to back to rebuild the record store.
//! [`compaction`] rewrites it to the minimal form of the current state.

pub mod compaction;
mod iterator;
mod record;
pub(crate) mod writer;

pub use compaction::CompactionStats;
pub use iterator::LogIterator;
pub use record::{LogOp, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
pub use writer::{PersistenceLog, ReplaySummary};
