//! # tidekv core
//!
//! Embedded transactional key-value store.
//!
//! This crate provides:
//! - An ordered record store with per-record expiration
//! - Secondary indexes over record values, kept consistent on every commit
//! - Snapshot-isolated transactions: one writer, any number of readers
//! - An append-only persistence log with crash recovery and online compaction
//! - A [`Registry`] of named databases for request layers
//!
//! ## Example
//!
//! ```rust
//! use tidekv_core::{CoreError, Database};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.update(|tx| {
//!     tx.set("a", "1", None)?;
//!     tx.set("b", "2", None)?;
//!     Ok::<_, CoreError>(())
//! })
//! .unwrap();
//!
//! let pairs = db
//!     .view(|tx| {
//!         Ok::<_, CoreError>(
//!             tx.ascend(None, None)?
//!                 .map(|(k, v)| (k.to_owned(), v.to_owned()))
//!                 .collect::<Vec<_>>(),
//!         )
//!     })
//!     .unwrap();
//! assert_eq!(pairs, [("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod database;
mod error;
mod index;
pub mod log;
mod maintenance;
mod registry;
mod store;
mod transaction;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, SyncPolicy};
pub use database::{Database, DatabaseStats};
pub use error::{CoreError, CoreResult};
pub use index::{CompareFn, Index, IndexDef, IndexSet, Pattern, Predicate, ValueOrder};
pub use log::{CompactionStats, LogIterator, LogOp, LogRecord, ReplaySummary};
pub use registry::Registry;
pub use store::{CowMap, KeyOrder, Record, RecordStore};
pub use transaction::{CommittedState, Transaction, TransactionManager, TransactionState};
pub use types::{SequenceNumber, Timestamp, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
