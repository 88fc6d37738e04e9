//! Dump-log command implementation.

use serde::Serialize;
use std::path::Path;
use tidekv_core::{LogIterator, LogOp, LogRecord};
use tidekv_storage::{FileBackend, StorageBackend};

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Commit sequence number.
    pub sequence: u64,
    /// Operations of a commit record.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<OpInfo>,
}

/// One logged operation.
#[derive(Debug, Serialize)]
pub struct OpInfo {
    /// Operation kind.
    pub op: &'static str,
    /// Affected key.
    pub key: String,
    /// Value size in bytes (sets only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_size: Option<usize>,
    /// Absolute expiration in unix milliseconds (sets only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl From<LogOp> for OpInfo {
    fn from(op: LogOp) -> Self {
        match op {
            LogOp::Set {
                key,
                value,
                expires_at,
            } => Self {
                op: "SET",
                key,
                value_size: Some(value.len()),
                expires_at: expires_at.map(|at| at.as_millis()),
            },
            LogOp::Delete { key } => Self {
                op: "DELETE",
                key,
                value_size: None,
                expires_at: None,
            },
            LogOp::Expire { key } => Self {
                op: "EXPIRE",
                key,
                value_size: None,
                expires_at: None,
            },
        }
    }
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("log file not found: {}", path.display()).into());
    }

    let backend = FileBackend::open(path)?;
    let (records, torn_tail) = read_records(&backend, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => print_text_output(&records, torn_tail),
    }
    Ok(())
}

/// Decodes up to `limit` records. Also reports whether the log ends in an
/// incomplete record.
pub fn read_records(
    backend: &dyn StorageBackend,
    limit: Option<usize>,
) -> Result<(Vec<RecordInfo>, bool), Box<dyn std::error::Error>> {
    let mut iter = LogIterator::new(backend)?;
    let mut records = Vec::new();
    for item in iter.by_ref().take(limit.unwrap_or(usize::MAX)) {
        let (offset, record) = item?;
        let sequence = record.sequence().as_u64();
        let info = match record {
            LogRecord::Commit { ops, .. } => RecordInfo {
                offset,
                record_type: "COMMIT",
                sequence,
                ops: ops.into_iter().map(OpInfo::from).collect(),
            },
            LogRecord::Seal { .. } => RecordInfo {
                offset,
                record_type: "SEAL",
                sequence,
                ops: Vec::new(),
            },
        };
        records.push(info);
    }
    Ok((records, iter.torn_tail()))
}

fn print_text_output(records: &[RecordInfo], torn_tail: bool) {
    println!("Log Records ({} shown)", records.len());
    println!("================");
    println!();

    for record in records {
        println!(
            "[{:08}] {:6} seq={} ops={}",
            record.offset,
            record.record_type,
            record.sequence,
            record.ops.len()
        );
        for op in &record.ops {
            print!("           {:6} {:?}", op.op, op.key);
            if let Some(size) = op.value_size {
                print!(" value={size} bytes");
            }
            if let Some(at) = op.expires_at {
                print!(" expires_at={at}");
            }
            println!();
        }
    }
    if torn_tail {
        println!();
        println!("(log ends in an incomplete record; it is discarded on next open)");
    }
}
