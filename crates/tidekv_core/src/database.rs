//! Database handle and recovery.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexSet;
use crate::log::compaction::{self, CompactionStats};
use crate::log::{LogRecord, PersistenceLog};
use crate::maintenance::{self, AutoCompact, Maintenance};
use crate::store::RecordStore;
use crate::transaction::{apply_op, CommittedState, Transaction, TransactionManager};
use crate::types::SequenceNumber;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidekv_storage::{FileBackend, StorageBackend};
use tracing::{debug, info, warn};

/// Point-in-time counters for a database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Live (non-expired) records.
    pub records: usize,
    /// Sequence number of the latest commit.
    pub committed_seq: SequenceNumber,
    /// Persistence log size in bytes (0 without a log).
    pub log_size: u64,
    /// Registered secondary indexes.
    pub indexes: usize,
}

/// The main database handle.
///
/// `Database` owns one record store, its indexes, the persistence log and
/// the transaction manager coordinating them. It is `Send + Sync`; share
/// it between threads behind an `Arc`.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use tidekv_core::{Config, CoreError, Database};
///
/// let db = Database::open_with_config("data/users.db", Config::default())?;
/// db.update(|tx| {
///     tx.set("user:1", "alice", None)?;
///     Ok::<_, CoreError>(())
/// })?;
/// let name = db.view(|tx| tx.get("user:1"))?;
/// assert_eq!(name, "alice");
/// db.close()?;
/// # Ok::<(), CoreError>(())
/// ```
///
/// # In-Memory Databases
///
/// `Database::open_in_memory()` keeps everything in memory and writes no
/// log; `Database::open_with_backend()` logs to any [`StorageBackend`].
pub struct Database {
    config: Config,
    /// Log file path; `None` for in-memory databases.
    path: Option<PathBuf>,
    manager: Arc<TransactionManager>,
    /// Holds the advisory lock on `<path>.lock` until close.
    lock_file: Mutex<Option<File>>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl Database {
    /// Opens or creates a database file with default configuration.
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database file, replaying its log.
    ///
    /// The method:
    /// - Creates the file and its directory if missing (unless
    ///   `create_if_missing` is false)
    /// - Takes an exclusive lock on `<path>.lock`
    /// - Finishes or discards a compaction interrupted by a crash
    /// - Replays the log and builds the configured indexes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file is missing and `create_if_missing` is false (`Io`)
    /// - Another handle has the database open (`DatabaseLocked`)
    /// - The log is damaged (`CorruptLog`)
    /// - I/O errors occur
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if !config.create_if_missing {
                return Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("database does not exist: {}", path.display()),
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = lock(path)?;
        compaction::recover(path)?;
        let backend = FileBackend::open(path)?;
        let log = PersistenceLog::new(
            Box::new(backend),
            Some(path.to_path_buf()),
            config.sync_policy,
        )?;

        Self::start(config, Some(log), Some(path.to_path_buf()), Some(lock_file))
    }

    /// Opens an empty database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the maintenance thread cannot be started.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens an in-memory database with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured index is defined twice or the
    /// maintenance thread cannot be started.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Self::start(config, None, None, None)
    }

    /// Opens a database logging to a custom backend, replaying what it
    /// already holds.
    ///
    /// Compaction rewrites such a log in place.
    ///
    /// # Errors
    ///
    /// Returns `CorruptLog` for a damaged log and any backend error.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let log = PersistenceLog::new(backend, None, config.sync_policy)?;
        Self::start(config, Some(log), None, None)
    }

    fn start(
        config: Config,
        mut log: Option<PersistenceLog>,
        path: Option<PathBuf>,
        lock_file: Option<File>,
    ) -> CoreResult<Self> {
        let now = config.clock.now();
        let mut state = CommittedState {
            seq: SequenceNumber::default(),
            records: RecordStore::new(config.key_order),
            indexes: IndexSet::new(),
        };

        if let Some(log) = log.as_mut() {
            let summary = log.replay(|record| {
                state.seq = state.seq.max(record.sequence());
                if let LogRecord::Commit { ops, .. } = record {
                    for op in ops {
                        apply_op(&mut state.records, op, now);
                    }
                }
                Ok(())
            })?;
            info!(
                path = ?path,
                records = summary.records,
                bytes = summary.valid_len,
                truncated = summary.truncated,
                sequence = %state.seq,
                keys = state.records.len(),
                "database opened"
            );
        }

        for def in &config.indexes {
            state.indexes.create(def.clone(), &state.records)?;
        }

        let manager = Arc::new(TransactionManager::new(
            state,
            log,
            Arc::clone(&config.clock),
            config.write_timeout,
        ));

        let maintenance = match config.maintenance_interval {
            Some(interval) if !interval.is_zero() => Some(Maintenance::start(
                Arc::clone(&manager),
                interval,
                AutoCompact {
                    percentage: config.auto_compact_percentage,
                    min_size: config.auto_compact_min_size,
                },
            )?),
            _ => None,
        };

        Ok(Self {
            config,
            path,
            manager,
            lock_file: Mutex::new(lock_file),
            maintenance: Mutex::new(maintenance),
        })
    }

    /// Returns the log file path, if the database lives on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.manager.committed_seq()
    }

    /// Begins a transaction.
    ///
    /// A read-only transaction never blocks. A writable one waits for the
    /// current writer to finish, up to the configured `write_timeout`.
    ///
    /// The transaction rolls back when dropped unless committed.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the write timeout expires and `DatabaseClosed`
    /// after [`close`](Self::close).
    pub fn begin(&self, writable: bool) -> CoreResult<Transaction<'_>> {
        if writable {
            self.manager.begin_write()
        } else {
            self.manager.begin_read()
        }
    }

    /// Begins a write transaction without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if another write transaction is active.
    pub fn try_begin_write(&self) -> CoreResult<Transaction<'_>> {
        self.manager.try_begin_write()
    }

    /// Runs `f` inside a read-only transaction.
    ///
    /// The transaction is always rolled back afterwards, and `f`'s result
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or the error from beginning the transaction.
    pub fn view<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut tx = self.manager.begin_read()?;
        tx.set_managed();
        let result = f(&tx);
        tx.finish_rollback()?;
        result
    }

    /// Runs `f` inside a write transaction.
    ///
    /// Commits if `f` returns `Ok`; otherwise rolls back and returns `f`'s
    /// error. A panic inside `f` also rolls back.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, `CommitFailed` if the commit could not be
    /// logged, or the error from beginning the transaction.
    pub fn update<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut tx = self.manager.begin_write()?;
        tx.set_managed();
        match f(&mut tx) {
            Ok(value) => {
                tx.finish_commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.finish_rollback()?;
                Err(e)
            }
        }
    }

    /// Compacts the persistence log.
    ///
    /// Writers keep committing while the new image is written.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error; the old log stays in place.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        self.manager.compact()
    }

    /// Deletes every expired record, returning how many were removed.
    ///
    /// Runs as one write transaction, so it waits for any active writer.
    ///
    /// # Errors
    ///
    /// Returns `Busy`, `CommitFailed` or `DatabaseClosed`.
    pub fn sweep_expired(&self) -> CoreResult<usize> {
        maintenance::sweep(&self.manager, true)
    }

    /// Fsyncs the log now, regardless of sync policy.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.manager.sync_pending()
    }

    /// Returns database counters.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after close, or a storage error reading the
    /// log size.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.ensure_open()?;
        let snapshot = self.manager.snapshot();
        Ok(DatabaseStats {
            records: snapshot.records.live_len(self.manager.now()),
            committed_seq: snapshot.seq,
            log_size: self.manager.log_size()?,
            indexes: snapshot.indexes.len(),
        })
    }

    /// Returns true until [`close`](Self::close) runs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.manager.is_closed()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.manager.is_closed() {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }

    /// Closes the database.
    ///
    /// Stops background maintenance, fsyncs and closes the log, and releases
    /// the file lock, even while other handles to this `Database` are alive.
    /// Later operations fail with `DatabaseClosed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the database is closed
    /// regardless.
    pub fn close(&self) -> CoreResult<()> {
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        let result = self.manager.close();
        if let Some(file) = self.lock_file.lock().take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(error = %e, "failed to release database lock");
            }
        }
        match result {
            Ok(true) => {
                info!(path = ?self.path, sequence = %self.manager.committed_seq(), "database closed");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing database");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Returns the lock file path for a database file.
pub(crate) fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Takes the exclusive advisory lock for `path`.
fn lock(path: &Path) -> CoreResult<File> {
    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    if file.try_lock_exclusive().is_err() {
        debug!(path = %lock_path.display(), "database lock held elsewhere");
        return Err(CoreError::DatabaseLocked);
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SyncPolicy;
    use crate::index::{IndexDef, ValueOrder};
    use crate::log::compaction::compact_path;
    use crate::log::writer::tests::FailingBackend;
    use crate::types::Timestamp;
    use std::time::Duration;
    use tempfile::tempdir;
    use tidekv_storage::InMemoryBackend;

    fn quiet() -> Config {
        Config::default().maintenance_interval(None)
    }

    fn pairs(db: &Database) -> Vec<(String, String)> {
        db.view(|tx| {
            Ok::<_, CoreError>(
                tx.ascend(None, None)?
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect(),
            )
        })
        .unwrap()
    }

    fn set(db: &Database, key: &str, value: &str) {
        db.update(|tx| tx.set(key, value, None).map(|_| ())).unwrap();
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Store(String),
        Rejected,
    }

    impl From<CoreError> for AppError {
        fn from(e: CoreError) -> Self {
            Self::Store(e.to_string())
        }
    }

    #[test]
    fn set_ascend_delete() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        set(&db, "a", "1");
        set(&db, "b", "2");
        assert_eq!(
            pairs(&db),
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );

        let removed = db.update(|tx| tx.delete("a")).unwrap();
        assert_eq!(removed, "1");
        let err = db.view(|tx| tx.get("a")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn set_reports_previous_value() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        assert_eq!(db.update(|tx| tx.set("k", "1", None)).unwrap(), None);
        assert_eq!(
            db.update(|tx| tx.set("k", "2", None)).unwrap(),
            Some("1".to_owned())
        );
    }

    #[test]
    fn update_rolls_back_on_error() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        set(&db, "keep", "1");

        let err = db
            .update(|tx| {
                tx.set("keep", "2", None)?;
                tx.set("new", "3", None)?;
                Err::<(), _>(AppError::Rejected)
            })
            .unwrap_err();
        assert_eq!(err, AppError::Rejected);
        assert_eq!(pairs(&db), vec![("keep".into(), "1".into())]);
        assert_eq!(db.committed_seq(), SequenceNumber::new(1));
    }

    #[test]
    fn update_rolls_back_on_panic() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            db.update(|tx| -> CoreResult<()> {
                tx.set("a", "1", None)?;
                panic!("callback failed")
            })
        }));
        assert!(result.is_err());
        assert!(pairs(&db).is_empty());
        // Write access was released.
        assert!(db.try_begin_write().is_ok());
    }

    #[test]
    fn view_propagates_error_and_rejects_writes() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        let err = db.view(|_| Err::<(), _>(AppError::Rejected)).unwrap_err();
        assert_eq!(err, AppError::Rejected);

        let mut tx = db.begin(false).unwrap();
        assert!(matches!(
            tx.set("a", "1", None),
            Err(CoreError::ReadOnlyTransaction)
        ));
    }

    #[test]
    fn managed_transaction_cannot_be_finished_manually() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        let err = db.update(|tx| tx.commit()).unwrap_err();
        assert!(matches!(err, CoreError::ManagedTransaction));
    }

    #[test]
    fn try_begin_write_is_busy_while_writer_active() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        let _writer = db.begin(true).unwrap();
        assert!(matches!(db.try_begin_write(), Err(CoreError::Busy)));
    }

    #[test]
    fn write_timeout_surfaces_busy() {
        let db = Database::open_in_memory_with_config(
            quiet().write_timeout(Some(Duration::from_millis(20))),
        )
        .unwrap();
        let _writer = db.begin(true).unwrap();
        let err = db.update(|tx| tx.set("a", "1", None)).unwrap_err();
        assert!(matches!(err, CoreError::Busy));
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            set(&db, "a", "1");
            set(&db, "b", "2");
            set(&db, "a", "3");
            db.update(|tx| tx.delete("b")).unwrap();
            db.close().unwrap();
        }

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(pairs(&db), vec![("a".into(), "3".into())]);
        assert_eq!(db.committed_seq(), SequenceNumber::new(4));
    }

    #[test]
    fn ttl_survives_reopen_and_expires() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let clock = Arc::new(ManualClock::new(1_000));
        let config = quiet().clock(clock.clone());
        {
            let db = Database::open_with_config(&path, config.clone()).unwrap();
            db.update(|tx| tx.set("session", "x", Some(Duration::from_secs(5))))
                .unwrap();
        }

        clock.set(5_999);
        {
            let db = Database::open_with_config(&path, config.clone()).unwrap();
            assert_eq!(db.view(|tx| tx.get("session")).unwrap(), "x");
            let ttl = db.view(|tx| tx.ttl("session")).unwrap();
            assert_eq!(ttl, Some(Duration::from_millis(1)));
        }

        clock.set(6_000);
        let db = Database::open_with_config(&path, config).unwrap();
        assert!(db.view(|tx| tx.get("session")).unwrap_err().is_not_found());
    }

    #[test]
    fn configured_indexes_are_built_after_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            set(&db, "user:1", "30");
            set(&db, "user:2", "4");
            set(&db, "other", "1");
        }

        let config = quiet().index(IndexDef::new("age", "user:*", ValueOrder::Int));
        let db = Database::open_with_config(&path, config).unwrap();
        let keys = db
            .view(|tx| {
                Ok::<_, CoreError>(
                    tx.ascend_index("age", None, None)?
                        .map(|(k, _)| k.to_owned())
                        .collect::<Vec<_>>(),
                )
            })
            .unwrap();
        assert_eq!(keys, vec!["user:2", "user:1"]);
        assert_eq!(db.stats().unwrap().indexes, 1);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert!(matches!(
            Database::open_with_config(&path, quiet()),
            Err(CoreError::DatabaseLocked)
        ));

        db.close().unwrap();
        assert!(Database::open_with_config(&path, quiet()).is_ok());
    }

    #[test]
    fn missing_file_without_create_is_io_error() {
        let dir = tempdir().unwrap();
        let result =
            Database::open_with_config(dir.path().join("absent"), quiet().create_if_missing(false));
        assert!(matches!(result, Err(CoreError::Io(_))));
    }

    #[test]
    fn closed_database_rejects_operations() {
        let db = Database::open_in_memory_with_config(quiet()).unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin(false), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            db.update(|tx| tx.set("a", "1", None)),
            Err(CoreError::DatabaseClosed)
        ));
        assert!(matches!(db.stats(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.compact(), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn corrupt_record_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            set(&db, "a", "1");
            set(&db, "b", "2");
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = Database::open_with_config(&path, quiet());
        assert!(matches!(result, Err(CoreError::CorruptLog { .. })));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            set(&db, "a", "1");
            set(&db, "b", "2");
        }
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(pairs(&db), vec![("a".into(), "1".into())]);
        set(&db, "c", "3");
        db.close().unwrap();

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(
            pairs(&db),
            vec![("a".into(), "1".into()), ("c".into(), "3".into())]
        );
    }

    #[test]
    fn compaction_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let expected = {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            for i in 0..200 {
                set(&db, &format!("k{:03}", i % 50), &i.to_string());
            }
            db.update(|tx| tx.delete("k000")).unwrap();
            let stats = db.compact().unwrap();
            assert_eq!(stats.records, 49);
            assert!(stats.bytes_after < stats.bytes_before);
            assert!(!compact_path(&path).exists());

            // Writes after compaction land in the new log.
            set(&db, "late", "1");
            pairs(&db)
        };

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(pairs(&db), expected);
    }

    #[test]
    fn interrupted_compaction_falls_back_to_old_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let expected = {
            let db = Database::open_with_config(&path, quiet()).unwrap();
            for i in 0..100 {
                set(&db, &format!("k{i:03}"), "v");
            }
            let snapshot = db.manager.snapshot();
            let (image, _) =
                compaction::image_bytes(&snapshot.records, snapshot.seq, Timestamp::from_millis(0))
                    .unwrap();
            // Killed before the seal was written and the file renamed.
            fs::write(compact_path(&path), &image[..image.len() / 2]).unwrap();
            pairs(&db)
        };

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(pairs(&db), expected);
        assert!(!compact_path(&path).exists());
    }

    #[test]
    fn compaction_under_write_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Arc::new(Database::open_with_config(&path, quiet()).unwrap());

        let writer = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 0..300 {
                    set(&db, &format!("k{i:04}"), &i.to_string());
                }
            })
        };
        for _ in 0..5 {
            db.compact().unwrap();
        }
        writer.join().unwrap();
        let expected = pairs(&db);
        assert_eq!(expected.len(), 300);
        db.close().unwrap();
        drop(db);

        let db = Database::open_with_config(&path, quiet()).unwrap();
        assert_eq!(pairs(&db), expected);
    }

    #[test]
    fn failed_commit_leaves_last_committed_state() {
        let backend = FailingBackend::default();
        let db = Database::open_with_backend(quiet(), Box::new(backend.clone())).unwrap();
        set(&db, "a", "1");

        backend.set_failing(true);
        let err = db
            .update(|tx| {
                tx.set("a", "2", None)?;
                tx.set("b", "3", None)
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::CommitFailed { .. }));
        assert_eq!(pairs(&db), vec![("a".into(), "1".into())]);

        backend.set_failing(false);
        set(&db, "c", "4");
        drop(db);

        let db = Database::open_with_backend(quiet(), Box::new(backend.inner.clone())).unwrap();
        assert_eq!(
            pairs(&db),
            vec![("a".into(), "1".into()), ("c".into(), "4".into())]
        );
    }

    fn filled(backend: &FailingBackend) -> Database {
        let db = Database::open_with_backend(quiet(), Box::new(backend.clone())).unwrap();
        for i in 0..5 {
            set(&db, &format!("k{i}"), &i.to_string());
        }
        db
    }

    #[test]
    fn failed_in_place_compaction_keeps_log() {
        let backend = FailingBackend::default();
        let db = filled(&backend);

        backend.fail_next_appends(1);
        assert!(db.compact().is_err());
        assert_eq!(pairs(&db).len(), 5);
        set(&db, "k5", "5");
        drop(db);

        let db = Database::open_with_backend(quiet(), Box::new(backend.inner.clone())).unwrap();
        assert_eq!(pairs(&db).len(), 6);
        assert_eq!(db.committed_seq(), SequenceNumber::new(6));
    }

    #[test]
    fn unrestorable_compaction_holds_commits() {
        let backend = FailingBackend::default();
        let db = filled(&backend);

        backend.set_failing(true);
        assert!(db.compact().is_err());
        let err = db.update(|tx| tx.set("k5", "5", None)).unwrap_err();
        assert!(matches!(err, CoreError::CommitFailed { .. }));
        assert_eq!(pairs(&db).len(), 5);

        backend.set_failing(false);
        set(&db, "k5", "5");
        drop(db);

        let db = Database::open_with_backend(quiet(), Box::new(backend.inner.clone())).unwrap();
        assert_eq!(pairs(&db).len(), 6);
    }

    #[cfg(target_os = "linux")]
    fn open_descriptors(path: &Path) -> usize {
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
            .filter(|target| target == path)
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_releases_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().canonicalize().unwrap().join("fd.db");
        let db = Arc::new(Database::open_with_config(&path, quiet()).unwrap());
        let held = Arc::clone(&db);
        set(&db, "a", "1");
        assert_eq!(open_descriptors(&path), 1);

        db.close().unwrap();
        assert_eq!(open_descriptors(&path), 0);
        assert!(matches!(held.begin(false), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn sweep_and_stats() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = InMemoryBackend::new();
        let db = Database::open_with_backend(
            quiet().clock(clock.clone()).sync_policy(SyncPolicy::Never),
            Box::new(backend),
        )
        .unwrap();
        db.update(|tx| {
            tx.set("a", "1", Some(Duration::from_secs(1)))?;
            tx.set("b", "2", None)
        })
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.committed_seq, SequenceNumber::new(1));
        assert!(stats.log_size > 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(db.stats().unwrap().records, 1);
        assert_eq!(db.sweep_expired().unwrap(), 1);
        assert_eq!(db.sweep_expired().unwrap(), 0);
        assert_eq!(db.committed_seq(), SequenceNumber::new(2));
    }

    mod replay {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        #[derive(Debug, Clone)]
        enum Op {
            Set(u8, u16),
            Delete(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => (0u8..20, any::<u16>()).prop_map(|(k, v)| Op::Set(k, v)),
                1 => (0u8..20).prop_map(Op::Delete),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn restart_reconstructs_state(
                batches in prop::collection::vec(prop::collection::vec(op(), 1..8), 0..20),
                compact_at in any::<prop::sample::Index>(),
            ) {
                let backend = InMemoryBackend::new();
                let mut model = BTreeMap::new();
                let compact_at = compact_at.index(batches.len().max(1));
                {
                    let db = Database::open_with_backend(quiet(), Box::new(backend.clone())).unwrap();
                    for (i, batch) in batches.iter().enumerate() {
                        db.update(|tx| {
                            for op in batch {
                                match op {
                                    Op::Set(k, v) => {
                                        tx.set(&format!("key{k:02}"), v.to_string(), None)?;
                                    }
                                    Op::Delete(k) => match tx.delete(&format!("key{k:02}")) {
                                        Ok(_) | Err(CoreError::NotFound) => {}
                                        Err(e) => return Err(e),
                                    },
                                }
                            }
                            Ok(())
                        })
                        .unwrap();
                        for op in batch {
                            match op {
                                Op::Set(k, v) => {
                                    model.insert(format!("key{k:02}"), v.to_string());
                                }
                                Op::Delete(k) => {
                                    model.remove(&format!("key{k:02}"));
                                }
                            }
                        }
                        if i == compact_at {
                            db.compact().unwrap();
                        }
                    }
                }

                let db = Database::open_with_backend(quiet(), Box::new(backend)).unwrap();
                let want: Vec<(String, String)> = model.into_iter().collect();
                prop_assert_eq!(pairs(&db), want);
            }
        }
    }
}
