//! CLI command implementations.

pub mod compact;
pub mod data;
pub mod dump_log;
pub mod stats;
pub mod verify;

use std::path::Path;
use tidekv_core::{Config, Database};

/// Opens a database for a one-shot command.
///
/// Background maintenance is off; the command closes the database itself.
pub fn open(path: &Path, create: bool) -> Result<Database, Box<dyn std::error::Error>> {
    tracing::debug!(path = %path.display(), create, "opening database");
    let config = Config::default()
        .create_if_missing(create)
        .maintenance_interval(None);
    Ok(Database::open_with_config(path, config)?)
}
