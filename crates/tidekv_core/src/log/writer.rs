//! Persistence log writer.

use crate::config::SyncPolicy;
use crate::error::{CoreError, CoreResult};
use crate::log::iterator::LogIterator;
use crate::log::record::LogRecord;
use std::path::{Path, PathBuf};
use tidekv_storage::StorageBackend;
use tracing::{info, warn};

/// Summary of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Number of records applied.
    pub records: u64,
    /// Bytes of valid log.
    pub valid_len: u64,
    /// Bytes of incomplete trailing record cut off.
    pub truncated: u64,
}

/// Repair owed after a compaction that failed partway.
enum Repair {
    /// The in-place rewrite failed and the original contents could not be
    /// put back yet.
    Restore(Vec<u8>),
    /// The compacted file was renamed over the log but could not be
    /// reopened; the current backend points at the unlinked old file.
    Reopen(PathBuf),
}

/// Append-only log of committed operations.
///
/// Owned by the transaction manager's commit path; nothing else writes to it.
/// While a repair is owed, every append first retries it and fails with
/// [`CoreError::CommitFailed`] until it succeeds.
pub struct PersistenceLog {
    backend: Box<dyn StorageBackend>,
    /// File path, when the log lives on disk. Compaction of a file log
    /// rewrites it atomically next to this path.
    path: Option<PathBuf>,
    sync_policy: SyncPolicy,
    /// Appends not yet fsynced.
    dirty: bool,
    /// Log size right after the last open or compaction.
    base_size: u64,
    pending_repair: Option<Repair>,
}

impl PersistenceLog {
    /// Wraps a backend.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        sync_policy: SyncPolicy,
    ) -> CoreResult<Self> {
        let base_size = backend.size()?;
        Ok(Self {
            backend,
            path,
            sync_policy,
            dirty: false,
            base_size,
            pending_repair: None,
        })
    }

    /// Returns the on-disk path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the sync policy.
    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }

    /// Returns the current log size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the backend, for reading.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Replays every record in order, then cuts off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptLog`] for damaged records and any error
    /// returned by `apply`.
    pub fn replay<F>(&mut self, mut apply: F) -> CoreResult<ReplaySummary>
    where
        F: FnMut(LogRecord) -> CoreResult<()>,
    {
        let mut summary = ReplaySummary::default();
        let (valid_len, torn_tail, total) = {
            let mut iter = LogIterator::new(self.backend.as_ref())?;
            for item in iter.by_ref() {
                let (_, record) = item?;
                apply(record)?;
                summary.records += 1;
            }
            (iter.offset(), iter.torn_tail(), self.backend.size()?)
        };

        summary.valid_len = valid_len;
        if torn_tail {
            summary.truncated = total - valid_len;
            warn!(
                offset = valid_len,
                bytes = summary.truncated,
                "discarding incomplete record at end of log"
            );
            self.backend.truncate(valid_len)?;
            self.backend.sync()?;
        }
        self.base_size = valid_len;
        Ok(summary)
    }

    /// Appends one record and makes it as durable as the sync policy asks.
    ///
    /// On failure the log is cut back to its size before the call, so a
    /// failed commit leaves no trace for replay.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommitFailed`] wrapping the underlying failure.
    pub fn append(&mut self, record: &LogRecord) -> CoreResult<u64> {
        self.repair().map_err(CoreError::commit_failed)?;
        let frame = record.to_frame().map_err(CoreError::commit_failed)?;
        let before = self.backend.size().map_err(|e| CoreError::commit_failed(e.into()))?;

        match self.write_frame(&frame) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(undo) = self.backend.truncate(before) {
                    warn!(error = %undo, offset = before, "failed to undo partial log append");
                }
                Err(CoreError::commit_failed(e))
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<u64> {
        let offset = self.backend.append(frame)?;
        match self.sync_policy {
            SyncPolicy::Always => self.backend.sync()?,
            SyncPolicy::EverySecond => {
                self.backend.flush()?;
                self.dirty = true;
            }
            SyncPolicy::Never => self.backend.flush()?,
        }
        Ok(offset)
    }

    /// Fsyncs appends made since the last sync, if any.
    pub fn sync_pending(&mut self) -> CoreResult<()> {
        self.repair()?;
        if self.dirty {
            self.backend.sync()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Flushes and fsyncs unconditionally.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.repair()?;
        self.backend.flush()?;
        self.backend.sync()?;
        self.dirty = false;
        Ok(())
    }

    /// Returns true if the log has grown enough to be worth compacting.
    pub fn should_compact(&self, percentage: u32, min_size: u64) -> CoreResult<bool> {
        if percentage == 0 {
            return Ok(false);
        }
        let size = self.size()?;
        let threshold = self
            .base_size
            .saturating_add(self.base_size.saturating_mul(u64::from(percentage)) / 100);
        Ok(size >= min_size && size >= threshold)
    }

    /// Returns true while a failed compaction still needs repairing.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        self.pending_repair.is_some()
    }

    /// Retries an owed repair, if any.
    pub(crate) fn repair(&mut self) -> CoreResult<()> {
        match self.pending_repair.take() {
            None => Ok(()),
            Some(Repair::Restore(original)) => match self.overwrite(&original) {
                Ok(()) => {
                    info!(bytes = original.len(), "restored log after failed compaction");
                    self.base_size = original.len() as u64;
                    Ok(())
                }
                Err(e) => {
                    self.pending_repair = Some(Repair::Restore(original));
                    Err(e)
                }
            },
            Some(Repair::Reopen(path)) => {
                let reopened = crate::log::compaction::reopen(&path)
                    .and_then(|backend| self.replace_backend(Box::new(backend)));
                match reopened {
                    Ok(()) => {
                        info!(path = %path.display(), "reopened compacted log");
                        Ok(())
                    }
                    Err(e) => {
                        self.pending_repair = Some(Repair::Reopen(path));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Replaces the backend after a compaction.
    pub(crate) fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) -> CoreResult<()> {
        self.base_size = backend.size()?;
        self.backend = backend;
        self.dirty = false;
        Ok(())
    }

    /// Marks the log as renamed away: until `path` reopens, the current
    /// backend must not take appends.
    pub(crate) fn reopen_later(&mut self, path: PathBuf) {
        self.pending_repair = Some(Repair::Reopen(path));
    }

    /// Rewrites the log in place with `frames`.
    ///
    /// Used for backends without a path, where there is no file to swap. If
    /// the rewrite fails, the original contents are written back; if that
    /// fails too, they are kept and restored before the next append.
    pub(crate) fn rewrite_in_place(&mut self, frames: &[u8]) -> CoreResult<()> {
        self.repair()?;
        let size = self.backend.size()?;
        let len = usize::try_from(size)
            .map_err(|_| CoreError::invalid_operation("log too large to rewrite in place"))?;
        let original = self.backend.read_at(0, len)?;

        if let Err(e) = self.overwrite(frames) {
            warn!(error = %e, "in-place compaction failed; restoring log");
            if let Err(restore) = self.overwrite(&original) {
                warn!(error = %restore, "failed to restore log; commits are held until it is");
                self.pending_repair = Some(Repair::Restore(original));
            }
            return Err(e);
        }
        self.base_size = self.backend.size()?;
        self.dirty = false;
        Ok(())
    }

    fn overwrite(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.backend.truncate(0)?;
        self.backend.append(bytes)?;
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for PersistenceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceLog")
            .field("path", &self.path)
            .field("sync_policy", &self.sync_policy)
            .field("base_size", &self.base_size)
            .field("needs_repair", &self.needs_repair())
            .finish_non_exhaustive()
    }
}
