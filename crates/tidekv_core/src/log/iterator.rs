//! Log record iterator.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use tidekv_storage::StorageBackend;

/// Iterates the framed records of a log from front to back.
///
/// Yields `(offset, record)` pairs.
///
/// # Error Handling
///
/// - A record cut short by the end of the log (incomplete header, payload or
///   CRC) ends iteration; [`torn_tail`](Self::torn_tail) then reports where
///   the valid prefix ends
/// - Invalid magic, an unsupported version, an unknown record type, or a CRC
///   mismatch yields [`CoreError::CorruptLog`] and ends iteration
pub struct LogIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    torn_tail: bool,
    finished: bool,
}

impl<'a> LogIterator<'a> {
    /// Creates an iterator over the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        Ok(Self {
            backend,
            total_size: backend.size()?,
            offset: 0,
            torn_tail: false,
            finished: false,
        })
    }

    /// Offset just past the last record read so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns true if iteration stopped at an incomplete trailing record.
    #[must_use]
    pub fn torn_tail(&self) -> bool {
        self.torn_tail
    }

    fn remaining(&self) -> u64 {
        self.total_size - self.offset
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        let start = self.offset;
        if self.remaining() == 0 {
            return Ok(None);
        }
        if self.remaining() < HEADER_SIZE as u64 {
            self.torn_tail = true;
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            return Err(CoreError::corrupt_log(start, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(CoreError::corrupt_log(
                start,
                format!("unsupported version {version}"),
            ));
        }
        let type_byte = header[6];
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::corrupt_log(start, format!("unknown record type {type_byte}"))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if self.remaining() < total_len as u64 {
            self.torn_tail = true;
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let computed_crc = hasher.finalize();
        if stored_crc != computed_crc {
            return Err(CoreError::corrupt_log(
                start,
                format!("checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
            ));
        }

        let record = LogRecord::decode_payload(record_type, payload, start)?;
        self.offset += total_len as u64;
        Ok(Some((start, record)))
    }
}

impl Iterator for LogIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
