//! Log record types and serialization.
//!
//! Every record is framed as
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (length) | crc32 (4) |
//! ```
//!
//! with all integers little-endian and the CRC computed over everything
//! before it.

use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, Timestamp};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"TKVL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// All operations of one committed write transaction.
    Commit = 1,
    /// End marker of a complete compacted log.
    Seal = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Seal),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_EXPIRE: u8 = 3;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Insert or replace a record.
    Set {
        /// Record key.
        key: String,
        /// Record value.
        value: String,
        /// Absolute expiration, if any.
        expires_at: Option<Timestamp>,
    },
    /// Remove a record.
    Delete {
        /// Record key.
        key: String,
    },
    /// Remove a record whose expiration passed.
    Expire {
        /// Record key.
        key: String,
    },
}

impl LogOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } | Self::Expire { key } => key,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        match self {
            Self::Set {
                key,
                value,
                expires_at,
            } => {
                buf.push(OP_SET);
                put_bytes(buf, key.as_bytes())?;
                put_bytes(buf, value.as_bytes())?;
                match expires_at {
                    Some(at) => {
                        buf.push(1);
                        buf.extend_from_slice(&at.as_millis().to_le_bytes());
                    }
                    None => buf.push(0),
                }
            }
            Self::Delete { key } => {
                buf.push(OP_DELETE);
                put_bytes(buf, key.as_bytes())?;
            }
            Self::Expire { key } => {
                buf.push(OP_EXPIRE);
                put_bytes(buf, key.as_bytes())?;
            }
        }
        Ok(())
    }

    fn decode_from(reader: &mut PayloadReader<'_>) -> CoreResult<Self> {
        match reader.u8()? {
            OP_SET => {
                let key = reader.string()?;
                let value = reader.string()?;
                let expires_at = match reader.u8()? {
                    0 => None,
                    1 => Some(Timestamp::from_millis(reader.u64()?)),
                    flag => return Err(reader.error(format!("invalid expiration flag {flag}"))),
                };
                Ok(Self::Set {
                    key,
                    value,
                    expires_at,
                })
            }
            OP_DELETE => Ok(Self::Delete {
                key: reader.string()?,
            }),
            OP_EXPIRE => Ok(Self::Expire {
                key: reader.string()?,
            }),
            tag => Err(reader.error(format!("unknown operation tag {tag}"))),
        }
    }
}

/// A framed entry of the persistence log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// The operations of one committed write transaction, applied together.
    Commit {
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
        /// Operations in the order they were made.
        ops: Vec<LogOp>,
    },
    /// Marks the end of a compacted image.
    Seal {
        /// Sequence number the compacted image reflects.
        sequence: SequenceNumber,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Seal { .. } => LogRecordType::Seal,
        }
    }

    /// Returns the sequence number carried by the record.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::Commit { sequence, .. } | Self::Seal { sequence } => *sequence,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a key, value, or operation count does not fit its
    /// 4-byte length field.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Commit { sequence, ops } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                buf.extend_from_slice(&len_u32(ops.len())?.to_le_bytes());
                for op in ops {
                    op.encode_into(&mut buf)?;
                }
            }
            Self::Seal { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// `offset` is the position of the record in the log and is only used
    /// for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptLog`] if the payload is malformed.
    pub fn decode_payload(
        record_type: LogRecordType,
        payload: &[u8],
        offset: u64,
    ) -> CoreResult<Self> {
        let mut reader = PayloadReader {
            payload,
            cursor: 0,
            offset,
        };
        let sequence = SequenceNumber::new(reader.u64()?);
        let record = match record_type {
            LogRecordType::Commit => {
                let count = reader.u32()? as usize;
                // Every op takes at least 5 bytes; don't trust a huge count.
                let mut ops = Vec::with_capacity(count.min(payload.len() / 5));
                for _ in 0..count {
                    ops.push(LogOp::decode_from(&mut reader)?);
                }
                Self::Commit { sequence, ops }
            }
            LogRecordType::Seal => Self::Seal { sequence },
        };
        if reader.cursor != payload.len() {
            return Err(reader.error(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                reader.cursor,
                payload.len()
            )));
        }
        Ok(record)
    }

    /// Serializes the record with its envelope, ready to append.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large to frame.
    pub fn to_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

fn len_u32(len: usize) -> CoreResult<u32> {
    u32::try_from(len).map_err(|_| CoreError::invalid_operation("log record field too large"))
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    buf.extend_from_slice(&len_u32(bytes.len())?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
    offset: u64,
}

impl<'a> PayloadReader<'a> {
    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::corrupt_log(self.offset, message)
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| self.error("unexpected end of payload"))?;
        let payload = self.payload;
        let bytes = &payload[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::corrupt_log(self.offset, "invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::corrupt_log(self.offset, "invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> CoreResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| self.error("string is not valid UTF-8"))
    }
}
