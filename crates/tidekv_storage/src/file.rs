//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over a single OS file.
///
/// `flush()` hands buffered bytes to the OS; `sync()` calls
/// `File::sync_all()` so they survive power loss. The cached size is kept
/// next to the handle under one lock so an append and its offset can never
/// be observed out of step.
///
/// # Example
///
/// ```no_run
/// use tidekv_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("users.db")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Creates (or truncates) the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size: 0 }),
        })
    }

    /// Opens the file at `path`, which must already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if data.is_empty() {
            return Ok(offset);
        }

        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: inner.size,
            });
        }

        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_returns_offsets() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kv.db")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kv.db")).unwrap();
        backend.append(b"abc").unwrap();

        let result = backend.read_at(2, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"persistent");
    }

    #[test]
    fn create_discards_existing_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"old").unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn truncate_cuts_tail_and_appends_continue() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kv.db")).unwrap();
        backend.append(b"keep-torn").unwrap();

        backend.truncate(4).unwrap();
        assert_eq!(backend.size().unwrap(), 4);

        assert_eq!(backend.append(b"!").unwrap(), 4);
        assert_eq!(backend.read_all().unwrap(), b"keep!");
    }

    #[test]
    fn truncate_cannot_grow() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("kv.db")).unwrap();
        backend.append(b"ab").unwrap();

        let result = backend.truncate(10);
        assert!(matches!(
            result,
            Err(StorageError::TruncateBeyondEnd { requested: 10, size: 2 })
        ));
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        assert!(FileBackend::open_existing(&path).is_err());
        assert!(!path.exists());

        FileBackend::open(&path).unwrap().append(b"abc").unwrap();
        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 3);
    }
}
