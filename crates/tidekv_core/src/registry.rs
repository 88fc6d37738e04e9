//! Named databases under one data directory.
//!
//! A request layer keeps one [`Registry`] and resolves database names
//! through it instead of holding process-wide handles. Each name maps to
//! `<data_dir>/<name>.db`, opened on first use and kept until closed.

use crate::config::Config;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File extension of database logs in a data directory.
const DB_EXTENSION: &str = "db";

/// Open databases by name.
pub struct Registry {
    data_dir: PathBuf,
    config: Config,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl Registry {
    /// Creates a registry opening databases under `data_dir` with `config`.
    ///
    /// Nothing is opened or created until [`open`](Self::open).
    pub fn new(data_dir: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            data_dir: data_dir.into(),
            config,
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the file a database name maps to.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] if the name is not usable as a
    /// file name.
    pub fn path_for(&self, name: &str) -> CoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.data_dir.join(format!("{name}.{DB_EXTENSION}")))
    }

    /// Returns the named database, opening (or creating) it on first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, or any error from [`Database::open_with_config`].
    pub fn open(&self, name: &str) -> CoreResult<Arc<Database>> {
        let path = self.path_for(name)?;
        if let Some(db) = self.databases.read().get(name) {
            return Ok(Arc::clone(db));
        }

        let mut databases = self.databases.write();
        if let Some(db) = databases.get(name) {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(Database::open_with_config(&path, self.config.clone())?);
        databases.insert(name.to_owned(), Arc::clone(&db));
        info!(name, path = %path.display(), "registered database");
        Ok(db)
    }

    /// Returns the named database if it is open.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    /// Closes the named database and forgets it.
    ///
    /// Handles still held elsewhere fail with `DatabaseClosed` from then on.
    /// Returns false if the name was not open.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Database::close`].
    pub fn close(&self, name: &str) -> CoreResult<bool> {
        let removed = self.databases.write().remove(name);
        match removed {
            Some(db) => {
                db.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every open database.
    ///
    /// All databases are closed even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first close error.
    pub fn close_all(&self) -> CoreResult<()> {
        let databases: Vec<_> = self.databases.write().drain().collect();
        let mut first_error = None;
        for (name, db) in databases {
            if let Err(e) = db.close() {
                warn!(name, error = %e, "failed to close database");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the names of open databases, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            warn!(error = %e, "error closing registry");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data_dir", &self.data_dir)
            .field("databases", &self.names())
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name.len() <= 200
        && !name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> Registry {
        Registry::new(dir, Config::default().maintenance_interval(None))
    }

    #[test]
    fn open_is_cached_per_name() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let a = registry.open("users").unwrap();
        let again = registry.open("users").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(registry.get("users").is_some());
        assert!(registry.get("orders").is_none());
        assert_eq!(a.path(), Some(dir.path().join("users.db").as_path()));
    }

    #[test]
    fn names_are_isolated() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry
            .open("a")
            .unwrap()
            .update(|tx| tx.set("k", "from a", None))
            .unwrap();
        let b = registry.open("b").unwrap();
        assert!(b.view(|tx| tx.get("k")).unwrap_err().is_not_found());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_unusable_names() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(registry.open(name), Err(CoreError::InvalidName { .. })),
                "{name:?}"
            );
        }
        assert!(registry.names().is_empty());
    }

    #[test]
    fn close_releases_and_reopens() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let db = registry.open("users").unwrap();
        db.update(|tx| tx.set("k", "v", None)).unwrap();

        assert!(registry.close("users").unwrap());
        assert!(!registry.close("users").unwrap());
        assert!(registry.get("users").is_none());
        assert!(matches!(db.begin(false), Err(CoreError::DatabaseClosed)));

        let reopened = registry.open("users").unwrap();
        assert_eq!(reopened.view(|tx| tx.get("k")).unwrap(), "v");
    }

    #[test]
    fn close_all_closes_everything() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let a = registry.open("a").unwrap();
        let b = registry.open("b").unwrap();
        registry.close_all().unwrap();
        assert!(registry.names().is_empty());
        assert!(!a.is_open());
        assert!(!b.is_open());
    }
}
