//! tidekv CLI
//!
//! Command-line tools for inspecting and maintaining a tidekv database file.
//!
//! # Commands
//!
//! - `get`, `set`, `del`, `scan` - Read and write records
//! - `compact` - Rewrite the log to its minimal form
//! - `dump-log` - Dump log records for debugging
//! - `verify` - Check every log record's framing and checksum
//! - `stats` - Display database statistics

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tidekv command-line database tools.
#[derive(Parser)]
#[command(name = "tidekv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of a key
    Get {
        /// Key to read
        key: String,
    },

    /// Set a key, creating the database if needed
    Set {
        /// Key to write
        key: String,

        /// Value to store
        value: String,

        /// Expire the record after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    Del {
        /// Key to delete
        key: String,
    },

    /// List records in key order
    Scan {
        /// First key to include
        #[arg(long)]
        from: Option<String>,

        /// Stop before this key
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Iterate in descending key order
        #[arg(short, long)]
        reverse: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compact the log to reclaim space
    Compact,

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity
    Verify,

    /// Display database statistics
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Get { key } => {
            let path = cli.path.ok_or("Database path required for get")?;
            commands::data::get(&path, &key)?;
        }
        Commands::Set { key, value, ttl } => {
            let path = cli.path.ok_or("Database path required for set")?;
            commands::data::set(&path, &key, &value, ttl)?;
        }
        Commands::Del { key } => {
            let path = cli.path.ok_or("Database path required for del")?;
            commands::data::del(&path, &key)?;
        }
        Commands::Scan {
            from,
            to,
            limit,
            reverse,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for scan")?;
            let range = commands::data::ScanRange {
                from: from.as_deref(),
                to: to.as_deref(),
                limit,
                reverse,
            };
            commands::data::scan(&path, &range, &format)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Database path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Database path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Stats { format } => {
            let path = cli.path.ok_or("Database path required for stats")?;
            commands::stats::run(&path, &format)?;
        }
        Commands::Version => {
            println!("tidekv CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tidekv core v{}", tidekv_core::VERSION);
        }
    }

    Ok(())
}
