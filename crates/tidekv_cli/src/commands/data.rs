//! Record commands: get, set, del, scan.

use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tidekv_core::{CoreError, Database};

/// One record in scan output.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Record key.
    pub key: String,
    /// Record value.
    pub value: String,
}

/// Bounds of a scan.
#[derive(Debug, Default)]
pub struct ScanRange<'a> {
    /// First key (inclusive); the upper end when reversed.
    pub from: Option<&'a str>,
    /// Stop key (exclusive); the lower end when reversed.
    pub to: Option<&'a str>,
    /// Maximum number of entries.
    pub limit: Option<usize>,
    /// Descending key order.
    pub reverse: bool,
}

/// Runs the get command.
pub fn get(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open(path, false)?;
    let value = match db.view(|tx| tx.get(key)) {
        Ok(value) => value,
        Err(e) if e.is_not_found() => return Err(format!("key not found: {key}").into()),
        Err(e) => return Err(e.into()),
    };
    println!("{value}");
    db.close()?;
    Ok(())
}

/// Runs the set command.
pub fn set(
    path: &Path,
    key: &str,
    value: &str,
    ttl_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open(path, true)?;
    let ttl = ttl_secs.map(Duration::from_secs);
    let previous = db.update(|tx| tx.set(key, value, ttl))?;
    if let Some(previous) = previous {
        println!("replaced {previous:?}");
    }
    db.close()?;
    Ok(())
}

/// Runs the del command.
pub fn del(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open(path, false)?;
    match db.update(|tx| tx.delete(key)) {
        Ok(previous) => println!("deleted {previous:?}"),
        Err(e) if e.is_not_found() => return Err(format!("key not found: {key}").into()),
        Err(e) => return Err(e.into()),
    }
    db.close()?;
    Ok(())
}

/// Runs the scan command.
pub fn scan(
    path: &Path,
    range: &ScanRange<'_>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open(path, false)?;
    let entries = collect(&db, range)?;
    db.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for entry in &entries {
                println!("{}\t{}", entry.key, entry.value);
            }
        }
    }
    Ok(())
}

/// Reads the entries of a scan from one snapshot.
pub fn collect(db: &Database, range: &ScanRange<'_>) -> Result<Vec<Entry>, CoreError> {
    let limit = range.limit.unwrap_or(usize::MAX);
    db.view(|tx| {
        let to_entry = |(key, value): (&str, &str)| Entry {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        let entries: Vec<Entry> = if range.reverse {
            tx.descend(range.from, range.to)?
                .take(limit)
                .map(to_entry)
                .collect()
        } else {
            tx.ascend(range.from, range.to)?
                .take(limit)
                .map(to_entry)
                .collect()
        };
        Ok(entries)
    })
}
