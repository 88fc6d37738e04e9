//! Transaction manager.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexSet;
use crate::log::compaction::{self, CompactionStats};
use crate::log::{LogOp, LogRecord, PersistenceLog};
use crate::store::RecordStore;
use crate::transaction::state::{Transaction, WriteAccess};
use crate::types::{SequenceNumber, Timestamp, TransactionId};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidekv_storage::{FileBackend, StorageBackend};
use tracing::{debug, info, warn};

/// Everything a reader can see, as of one commit.
///
/// Published whole through an [`ArcSwap`]; cloning it is cheap because the
/// record store and indexes share structure with the original.
#[derive(Debug, Clone, Default)]
pub struct CommittedState {
    /// Sequence number of the commit this state reflects.
    pub seq: SequenceNumber,
    /// All records.
    pub records: RecordStore,
    /// All secondary indexes.
    pub indexes: IndexSet,
}

/// Coordinates readers, the single writer, and the persistence log.
///
/// ## Single-Writer Guarantee
///
/// At most one write transaction exists at a time: it holds `write_lock`
/// from begin until commit or rollback. Readers never take that lock; they
/// load the current [`CommittedState`] and keep it for their lifetime.
///
/// ## Visibility
///
/// A commit appends its log record and then swaps the published state while
/// still holding the log lock, so the log offset and the published state
/// always agree for anyone holding that lock (compaction relies on this).
/// Readers that begin after the swap see every write of the commit; readers
/// that began before see none.
pub struct TransactionManager {
    /// Latest committed state.
    state: ArcSwap<CommittedState>,
    /// Write lock - only one writer at a time.
    write_lock: Mutex<()>,
    /// Commit log; `None` for purely in-memory databases and once closed.
    log: Mutex<Option<PersistenceLog>>,
    /// Serializes compactions.
    compact_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    write_timeout: Option<Duration>,
    next_txid: AtomicU64,
    closed: AtomicBool,
}

impl TransactionManager {
    /// Creates a manager over recovered state.
    pub fn new(
        state: CommittedState,
        log: Option<PersistenceLog>,
        clock: Arc<dyn Clock>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
            write_lock: Mutex::new(()),
            log: Mutex::new(log),
            compact_lock: Mutex::new(()),
            clock,
            write_timeout,
            next_txid: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }

    fn next_id(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the current time according to the database clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the latest committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CommittedState> {
        self.state.load_full()
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.state.load().seq
    }

    /// Begins a read-only transaction over the latest committed state.
    ///
    /// Never blocks.
    pub fn begin_read(&self) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        Ok(Transaction::read(self, self.next_id(), self.snapshot()))
    }

    /// Begins a write transaction, waiting for write access.
    ///
    /// With a configured write timeout, fails with [`CoreError::Busy`] once
    /// the deadline passes.
    pub fn begin_write(&self) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        let guard = match self.write_timeout {
            Some(timeout) => self.write_lock.try_lock_for(timeout).ok_or(CoreError::Busy)?,
            None => self.write_lock.lock(),
        };
        self.start_write(guard)
    }

    /// Begins a write transaction only if write access is free right now.
    pub fn try_begin_write(&self) -> CoreResult<Transaction<'_>> {
        self.ensure_open()?;
        let guard = self.write_lock.try_lock().ok_or(CoreError::Busy)?;
        self.start_write(guard)
    }

    fn start_write<'a>(
        &'a self,
        guard: parking_lot::MutexGuard<'a, ()>,
    ) -> CoreResult<Transaction<'a>> {
        // The database may have closed while we waited.
        self.ensure_open()?;
        let working = CommittedState::clone(&self.state.load());
        Ok(Transaction::write(self, self.next_id(), WriteAccess::new(guard, working)))
    }

    /// Makes a write transaction's changes durable and visible.
    ///
    /// Consumes the write access; the write lock is released when this
    /// returns, whether or not the commit succeeded. Only commits that log
    /// operations take a new sequence number; index definitions are not
    /// logged, so a commit that only changes them keeps the current one.
    pub(crate) fn commit_write(
        &self,
        txid: TransactionId,
        access: WriteAccess<'_>,
    ) -> CoreResult<SequenceNumber> {
        let (guard, mut working, ops, indexes_changed) = access.into_parts();
        let current = self.committed_seq();
        if ops.is_empty() && !indexes_changed {
            return Ok(current);
        }

        let sequence = if ops.is_empty() { current } else { current.next() };
        working.seq = sequence;

        let mut log_guard = self.log.lock();
        self.ensure_open()?;
        if let (Some(log), false) = (log_guard.as_mut(), ops.is_empty()) {
            let op_count = ops.len();
            let record = LogRecord::Commit { sequence, ops };
            if let Err(e) = log.append(&record) {
                warn!(%txid, %sequence, error = %e, "commit failed; rolled back");
                return Err(e);
            }
            debug!(%txid, %sequence, ops = op_count, "committed");
        }
        self.state.store(Arc::new(working));
        drop(log_guard);
        drop(guard);
        Ok(sequence)
    }

    /// Fsyncs commits made under [`SyncPolicy::EverySecond`](crate::SyncPolicy::EverySecond).
    pub fn sync_pending(&self) -> CoreResult<()> {
        if let Some(log) = self.log.lock().as_mut() {
            log.sync_pending()?;
        }
        Ok(())
    }

    /// Returns the log size in bytes (0 without a log).
    pub fn log_size(&self) -> CoreResult<u64> {
        match self.log.lock().as_ref() {
            Some(log) => log.size(),
            None => Ok(0),
        }
    }

    /// Returns true if the log has grown enough to compact.
    pub fn should_compact(&self, percentage: u32, min_size: u64) -> CoreResult<bool> {
        match self.log.lock().as_ref() {
            Some(log) => log.should_compact(percentage, min_size),
            None => Ok(false),
        }
    }

    /// Rewrites the log to the minimal form of the current state.
    ///
    /// Commits keep flowing while the image is written; they are only held
    /// off for the final copy of the log tail and the file swap.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        self.ensure_open()?;
        let _compacting = self.compact_lock.lock();

        let (snapshot, offset, path) = {
            let mut guard = self.log.lock();
            let Some(log) = guard.as_mut() else {
                return Ok(CompactionStats::default());
            };
            log.repair()?;
            (self.snapshot(), log.size()?, log.path().map(Path::to_path_buf))
        };
        let now = self.now();
        info!(sequence = %snapshot.seq, bytes = offset, "compacting log");

        let stats = match path {
            Some(path) => {
                let image_path = compaction::compact_path(&path);
                let result = self.compact_file(&snapshot, offset, now, &path, &image_path);
                if result.is_err() && image_path.exists() {
                    if let Err(e) = std::fs::remove_file(&image_path) {
                        warn!(path = %image_path.display(), error = %e, "failed to remove compaction file");
                    }
                }
                result?
            }
            None => {
                let mut guard = self.log.lock();
                let log = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
                // Without a file to swap, rewrite under the lock from the
                // latest state so nothing committed meanwhile is lost.
                let snapshot = self.snapshot();
                let bytes_before = log.size()?;
                let (image, records) = compaction::image_bytes(&snapshot.records, snapshot.seq, now)?;
                log.rewrite_in_place(&image)?;
                CompactionStats {
                    records,
                    bytes_before,
                    bytes_after: log.size()?,
                }
            }
        };
        info!(
            records = stats.records,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "compaction finished"
        );
        Ok(stats)
    }

    fn compact_file(
        &self,
        snapshot: &CommittedState,
        offset: u64,
        now: Timestamp,
        path: &Path,
        image_path: &Path,
    ) -> CoreResult<CompactionStats> {
        let mut image = FileBackend::create(image_path)?;
        let records = compaction::write_image(&mut image, &snapshot.records, snapshot.seq, now)?;

        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
        let bytes_before = log.size()?;
        if bytes_before > offset {
            let len = usize::try_from(bytes_before - offset)
                .map_err(|_| CoreError::invalid_operation("log tail too large to copy"))?;
            let tail = log.backend().read_at(offset, len)?;
            image.append(&tail)?;
        }
        compaction::seal(&mut image, self.committed_seq())?;
        drop(image);

        compaction::swap(image_path, path)?;
        // Past the rename the old file is unlinked: appends must not reach
        // it, so a failed reopen holds commits until a later one succeeds.
        let reopened = compaction::reopen(path)
            .and_then(|backend| log.replace_backend(Box::new(backend)));
        if let Err(e) = reopened {
            warn!(path = %path.display(), error = %e, "failed to reopen compacted log; commits held");
            log.reopen_later(path.to_path_buf());
            return Err(e);
        }
        Ok(CompactionStats {
            records,
            bytes_before,
            bytes_after: log.size()?,
        })
    }

    /// Stops accepting transactions, makes the log durable and releases it.
    ///
    /// Returns false if the manager was already closed.
    pub fn close(&self) -> CoreResult<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let log = self.log.lock().take();
        if let Some(mut log) = log {
            log.sync()?;
        }
        Ok(true)
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("persistent", &self.log.try_lock().map(|log| log.is_some()))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Applies one logged operation during replay.
///
/// Records whose expiration has already passed are dropped instead of
/// loaded.
pub(crate) fn apply_op(records: &mut RecordStore, op: LogOp, now: Timestamp) {
    match op {
        LogOp::Set {
            key,
            value,
            expires_at,
        } => {
            let record = crate::store::Record { value, expires_at };
            if record.is_expired(now) {
                records.delete(&key);
            } else {
                records.put(&key, record);
            }
        }
        LogOp::Delete { key } | LogOp::Expire { key } => {
            records.delete(&key);
        }
    }
}
