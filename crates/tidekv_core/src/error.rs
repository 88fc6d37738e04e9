//! Error types for tidekv core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tidekv core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key or index is absent, or the record has expired.
    #[error("not found")]
    NotFound,

    /// An index with this name is already registered.
    #[error("index already exists: {name}")]
    DuplicateIndex {
        /// Name of the index.
        name: String,
    },

    /// The transaction has already been committed or rolled back.
    #[error("transaction closed")]
    TransactionClosed,

    /// Write access could not be acquired before the deadline.
    #[error("database busy: another write transaction is active")]
    Busy,

    /// The commit could not be appended to the persistence log.
    ///
    /// The in-memory state is left exactly as it was before the commit.
    #[error("commit failed: {source}")]
    CommitFailed {
        /// The underlying log failure.
        #[source]
        source: Box<CoreError>,
    },

    /// The persistence log could not be replayed.
    #[error("corrupt log at offset {offset}: {message}")]
    CorruptLog {
        /// Byte offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidekv_storage::StorageError),

    /// Another handle holds the database file lock.
    #[error("database locked: another handle has exclusive access")]
    DatabaseLocked,

    /// The database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// A mutation was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// Manual commit or rollback inside `view`/`update`.
    #[error("transaction is managed by view/update and cannot be finished manually")]
    ManagedTransaction,

    /// A database name cannot be used as a file name.
    #[error("invalid database name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt log error.
    pub fn corrupt_log(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptLog {
            offset,
            message: message.into(),
        }
    }

    /// Wraps a log failure as a commit failure.
    pub fn commit_failed(source: CoreError) -> Self {
        Self::CommitFailed {
            source: Box::new(source),
        }
    }

    /// Creates a duplicate index error.
    pub fn duplicate_index(name: impl Into<String>) -> Self {
        Self::DuplicateIndex { name: name.into() }
    }

    /// Creates an invalid name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::NotFound`].
    ///
    /// Request layers map this to their "not found" status and every other
    /// store error to "bad request".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
