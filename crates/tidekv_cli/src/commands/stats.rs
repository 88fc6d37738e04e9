//! Stats command implementation.

use serde::Serialize;
use std::path::Path;
use tidekv_core::log::compaction::compact_path;

/// Database statistics for output.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Database file path.
    pub path: String,
    /// Live records.
    pub records: usize,
    /// Sequence number of the latest commit.
    pub committed_seq: u64,
    /// Log size in bytes.
    pub log_size: u64,
    /// Whether an unfinished compaction file is present.
    pub pending_compaction: bool,
}

/// Runs the stats command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("Database: {}", report.path);
            println!("  Records:        {}", report.records);
            println!("  Committed seq:  {}", report.committed_seq);
            println!("  Log size:       {} bytes", report.log_size);
            if report.pending_compaction {
                println!("  Note: unfinished compaction file present");
            }
        }
    }
    Ok(())
}

/// Gathers statistics for a database file.
pub fn collect(path: &Path) -> Result<StatsReport, Box<dyn std::error::Error>> {
    // Checked before opening, which resolves any leftover compaction file.
    let pending_compaction = compact_path(path).exists();
    let db = super::open(path, false)?;
    let stats = db.stats()?;
    db.close()?;
    Ok(StatsReport {
        path: path.display().to_string(),
        records: stats.records,
        committed_seq: stats.committed_seq.as_u64(),
        log_size: stats.log_size,
        pending_compaction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reports_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.db");
        super::super::data::set(&path, "a", "1", None).unwrap();
        super::super::data::set(&path, "b", "2", None).unwrap();

        let report = collect(&path).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.committed_seq, 2);
        assert!(report.log_size > 0);
        assert!(!report.pending_compaction);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records"], 2);
    }
}
