//! Log compaction.
//!
//! Compaction rewrites the log as the minimal set of `Set` operations that
//! reproduces the live records of one snapshot, followed by whatever was
//! committed while the rewrite ran, and a closing `Seal` record.
//!
//! For file logs the new image is built in `<log>.compact` and renamed over
//! the log only once it is complete and synced, so a crash at any point
//! leaves either the old log or a fully sealed new one.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state
//! - A `.compact` file without a trailing `Seal` is never used
//! - Only live (non-expired) records are carried over

use crate::error::CoreResult;
use crate::log::iterator::LogIterator;
use crate::log::record::{LogOp, LogRecord};
use crate::store::RecordStore;
use crate::types::{SequenceNumber, Timestamp};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tidekv_storage::{FileBackend, StorageBackend};
use tracing::{info, warn};

/// Maximum operations per compacted commit record.
pub(crate) const OPS_PER_RECORD: usize = 1024;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Records written to the new image.
    pub records: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
}

/// Returns the path of the compaction file for a log.
#[must_use]
pub fn compact_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

/// Appends the live records of `store` as commit records tagged `sequence`.
///
/// Returns the number of records written.
pub(crate) fn write_image(
    backend: &mut dyn StorageBackend,
    store: &RecordStore,
    sequence: SequenceNumber,
    now: Timestamp,
) -> CoreResult<u64> {
    let mut written = 0;
    let mut ops = Vec::with_capacity(OPS_PER_RECORD);
    for (key, record) in store.ascend(None, None, now) {
        ops.push(LogOp::Set {
            key: key.to_owned(),
            value: record.value.clone(),
            expires_at: record.expires_at,
        });
        written += 1;
        if ops.len() == OPS_PER_RECORD {
            let batch = std::mem::replace(&mut ops, Vec::with_capacity(OPS_PER_RECORD));
            backend.append(&LogRecord::Commit { sequence, ops: batch }.to_frame()?)?;
        }
    }
    if !ops.is_empty() {
        backend.append(&LogRecord::Commit { sequence, ops }.to_frame()?)?;
    }
    Ok(written)
}

/// Encodes the live records of `store` followed by a seal, in memory.
pub(crate) fn image_bytes(
    store: &RecordStore,
    sequence: SequenceNumber,
    now: Timestamp,
) -> CoreResult<(Vec<u8>, u64)> {
    let mut image = tidekv_storage::InMemoryBackend::new();
    let records = write_image(&mut image, store, sequence, now)?;
    image.append(&LogRecord::Seal { sequence }.to_frame()?)?;
    Ok((image.data(), records))
}

/// Appends a seal and makes the image durable.
pub(crate) fn seal(backend: &mut dyn StorageBackend, sequence: SequenceNumber) -> CoreResult<()> {
    backend.append(&LogRecord::Seal { sequence }.to_frame()?)?;
    backend.flush()?;
    backend.sync()?;
    Ok(())
}

/// Renames a finished image over the log.
pub(crate) fn swap(image_path: &Path, log_path: &Path) -> CoreResult<()> {
    fs::rename(image_path, log_path)?;
    Ok(())
}

/// Makes a swap durable and opens the new log, which must exist.
pub(crate) fn reopen(log_path: &Path) -> CoreResult<FileBackend> {
    sync_parent_directory(log_path)?;
    Ok(FileBackend::open_existing(log_path)?)
}

/// Returns true if `backend` holds a complete, sealed image.
fn is_sealed(backend: &dyn StorageBackend) -> bool {
    let Ok(mut iter) = LogIterator::new(backend) else {
        return false;
    };
    let mut last_is_seal = false;
    for item in iter.by_ref() {
        match item {
            Ok((_, record)) => last_is_seal = matches!(record, LogRecord::Seal { .. }),
            Err(_) => return false,
        }
    }
    last_is_seal && !iter.torn_tail()
}

/// Resolves a compaction interrupted by a crash.
///
/// A sealed `.compact` file replaces the log; anything else is discarded and
/// the old log is kept. Returns true if the compacted image was installed.
pub fn recover(log_path: &Path) -> CoreResult<bool> {
    let image_path = compact_path(log_path);
    if !image_path.exists() {
        return Ok(false);
    }

    let sealed = {
        let image = FileBackend::open(&image_path)?;
        is_sealed(&image)
    };
    if sealed {
        info!(path = %image_path.display(), "installing compacted log left by interrupted compaction");
        fs::rename(&image_path, log_path)?;
        sync_parent_directory(log_path)?;
        Ok(true)
    } else {
        warn!(path = %image_path.display(), "discarding incomplete compacted log");
        fs::remove_file(&image_path)?;
        Ok(false)
    }
}

/// Fsyncs the directory containing `path` so a rename is durable.
#[cfg(unix)]
pub(crate) fn sync_parent_directory(path: &Path) -> CoreResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory fsync is not supported on this platform; NTFS journals
/// metadata updates.
#[cfg(not(unix))]
pub(crate) fn sync_parent_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;
    use tempfile::tempdir;

    fn store() -> RecordStore {
        let mut store = RecordStore::default();
        for i in 0..2_500 {
            store.put(&format!("key:{i:05}"), Record::new(i.to_string()));
        }
        store.put("gone", Record::expiring("x", Timestamp::from_millis(10)));
        store
    }

    fn replayed(backend: &dyn StorageBackend) -> Vec<LogRecord> {
        LogIterator::new(backend)
            .unwrap()
            .map(|item| item.unwrap().1)
            .collect()
    }

    #[test]
    fn compact_path_appends_suffix() {
        assert_eq!(
            compact_path(Path::new("/data/users.db")),
            PathBuf::from("/data/users.db.compact")
        );
    }

    #[test]
    fn image_holds_live_records_in_batches() {
        let (bytes, records) = image_bytes(&store(), SequenceNumber::new(9), Timestamp::from_millis(20)).unwrap();
        assert_eq!(records, 2_500);

        let backend = tidekv_storage::InMemoryBackend::with_data(bytes);
        let log = replayed(&backend);
        assert_eq!(log.len(), 4); // 1024 + 1024 + 452 + seal
        assert!(matches!(log.last(), Some(LogRecord::Seal { sequence }) if *sequence == SequenceNumber::new(9)));
        let keys: usize = log
            .iter()
            .map(|r| match r {
                LogRecord::Commit { ops, .. } => ops.len(),
                LogRecord::Seal { .. } => 0,
            })
            .sum();
        assert_eq!(keys, 2_500);
        assert!(!is_sealed(&tidekv_storage::InMemoryBackend::new()));
    }

    #[test]
    fn recover_installs_sealed_image() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("db");
        fs::write(&log_path, b"old").unwrap();

        let (bytes, _) = image_bytes(&store(), SequenceNumber::new(1), Timestamp::from_millis(0)).unwrap();
        fs::write(compact_path(&log_path), &bytes).unwrap();

        assert!(recover(&log_path).unwrap());
        assert!(!compact_path(&log_path).exists());
        assert_eq!(fs::read(&log_path).unwrap(), bytes);
    }

    #[test]
    fn recover_discards_unsealed_image() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("db");
        fs::write(&log_path, b"old").unwrap();

        let (bytes, _) = image_bytes(&store(), SequenceNumber::new(1), Timestamp::from_millis(0)).unwrap();
        // Cut the seal off, as if the process died mid-compaction.
        fs::write(compact_path(&log_path), &bytes[..bytes.len() - 10]).unwrap();

        assert!(!recover(&log_path).unwrap());
        assert!(!compact_path(&log_path).exists());
        assert_eq!(fs::read(&log_path).unwrap(), b"old");
    }

    #[test]
    fn recover_without_image_is_noop() {
        let dir = tempdir().unwrap();
        assert!(!recover(&dir.path().join("db")).unwrap());
    }

    #[test]
    fn swap_replaces_log() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("db");
        let image_path = compact_path(&log_path);
        fs::write(&log_path, b"old").unwrap();

        let mut image = FileBackend::create(&image_path).unwrap();
        write_image(&mut image, &store(), SequenceNumber::new(3), Timestamp::from_millis(0)).unwrap();
        seal(&mut image, SequenceNumber::new(3)).unwrap();
        drop(image);

        swap(&image_path, &log_path).unwrap();
        assert!(!image_path.exists());
        let backend = reopen(&log_path).unwrap();
        assert!(matches!(replayed(&backend).last(), Some(LogRecord::Seal { .. })));
    }

    #[test]
    fn reopen_does_not_create_missing_log() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("db");
        assert!(reopen(&log_path).is_err());
        assert!(!log_path.exists());
    }
}
