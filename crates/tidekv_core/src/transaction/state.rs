//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDef, Pattern};
use crate::log::LogOp;
use crate::store::Record;
use crate::transaction::manager::{CommittedState, TransactionManager};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Duration;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// Exclusive write access plus the write-buffer built under it.
pub(crate) struct WriteAccess<'a> {
    guard: MutexGuard<'a, ()>,
    /// Copy-on-write clone of the committed state, mutated in place.
    working: CommittedState,
    /// Operations to log on commit, in order.
    ops: Vec<LogOp>,
    indexes_changed: bool,
}

impl<'a> WriteAccess<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, ()>, working: CommittedState) -> Self {
        Self {
            guard,
            working,
            ops: Vec::new(),
            indexes_changed: false,
        }
    }

    pub(crate) fn into_parts(self) -> (MutexGuard<'a, ()>, CommittedState, Vec<LogOp>, bool) {
        (self.guard, self.working, self.ops, self.indexes_changed)
    }

    fn remove(&mut self, key: &str, op: LogOp) -> Option<Record> {
        let removed = self.working.records.delete(key)?;
        self.working.indexes.on_delete(key, &removed);
        self.ops.push(op);
        Some(removed)
    }
}

enum Mode<'a> {
    Read(Arc<CommittedState>),
    Write(WriteAccess<'a>),
}

/// A read-only or read-write transaction.
///
/// A read-only transaction sees the state committed when it began, no
/// matter what commits afterwards. A read-write transaction holds the
/// database's write lock and sees its own uncommitted writes; nothing it
/// does is visible to anyone else until [`commit`](Self::commit).
///
/// Dropping an active transaction rolls it back.
pub struct Transaction<'a> {
    manager: &'a TransactionManager,
    id: TransactionId,
    /// `None` once the transaction has finished.
    mode: Option<Mode<'a>>,
    state: TransactionState,
    /// Set while owned by `view`/`update`, which finish it themselves.
    managed: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn read(
        manager: &'a TransactionManager,
        id: TransactionId,
        snapshot: Arc<CommittedState>,
    ) -> Self {
        Self {
            manager,
            id,
            mode: Some(Mode::Read(snapshot)),
            state: TransactionState::Active,
            managed: false,
        }
    }

    pub(crate) fn write(manager: &'a TransactionManager, id: TransactionId, access: WriteAccess<'a>) -> Self {
        Self {
            manager,
            id,
            mode: Some(Mode::Write(access)),
            state: TransactionState::Active,
            managed: false,
        }
    }

    pub(crate) fn set_managed(&mut self) {
        self.managed = true;
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true for read-write transactions.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self.mode, Some(Mode::Write(_)))
    }

    /// Returns the sequence number of the commit this transaction reads from.
    pub fn snapshot_seq(&self) -> CoreResult<SequenceNumber> {
        Ok(self.view()?.seq)
    }

    fn view(&self) -> CoreResult<&CommittedState> {
        match &self.mode {
            Some(Mode::Read(snapshot)) => Ok(snapshot.as_ref()),
            Some(Mode::Write(access)) => Ok(&access.working),
            None => Err(CoreError::TransactionClosed),
        }
    }

    fn access(&mut self) -> CoreResult<&mut WriteAccess<'a>> {
        match &mut self.mode {
            Some(Mode::Write(access)) => Ok(access),
            Some(Mode::Read(_)) => Err(CoreError::ReadOnlyTransaction),
            None => Err(CoreError::TransactionClosed),
        }
    }

    /// Returns the value of a live record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the key is absent or expired.
    pub fn get(&self, key: &str) -> CoreResult<String> {
        let now = self.manager.now();
        self.view()?
            .records
            .get(key, now)
            .map(|record| record.value.clone())
            .ok_or(CoreError::NotFound)
    }

    /// Sets a value, optionally expiring `ttl` from now.
    ///
    /// Returns the previous live value, or `None` if the key did not exist
    /// (or had expired).
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> CoreResult<Option<String>> {
        let now = self.manager.now();
        let access = self.access()?;
        let record = match ttl {
            Some(ttl) => Record::expiring(value, now.saturating_add(ttl)),
            None => Record::new(value),
        };

        let previous = access.working.records.put(key, record.clone());
        access
            .working
            .indexes
            .on_put(key, previous.as_ref(), &record);
        access.ops.push(LogOp::Set {
            key: key.to_owned(),
            value: record.value,
            expires_at: record.expires_at,
        });
        Ok(previous
            .filter(|previous| !previous.is_expired(now))
            .map(|previous| previous.value))
    }

    /// Deletes a record, returning its value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the key is absent. An expired
    /// record is removed but still reported as not found.
    pub fn delete(&mut self, key: &str) -> CoreResult<String> {
        let now = self.manager.now();
        let access = self.access()?;
        let removed = access
            .remove(key, LogOp::Delete { key: key.to_owned() })
            .ok_or(CoreError::NotFound)?;
        if removed.is_expired(now) {
            return Err(CoreError::NotFound);
        }
        Ok(removed.value)
    }

    /// Deletes every record. Index definitions are kept.
    pub fn delete_all(&mut self) -> CoreResult<()> {
        let access = self.access()?;
        let keys: Vec<String> = access.working.records.iter().map(|(k, _)| k.to_owned()).collect();
        access.working.records.clear();
        access.working.indexes.clear();
        access
            .ops
            .extend(keys.into_iter().map(|key| LogOp::Delete { key }));
        Ok(())
    }

    /// Removes every record whose expiration has passed, logging each as
    /// expired. Returns how many were removed.
    pub(crate) fn expire_due(&mut self) -> CoreResult<usize> {
        let now = self.manager.now();
        let access = self.access()?;
        let due: Vec<String> = access.working.records.expired(now).map(str::to_owned).collect();
        for key in &due {
            access.remove(key, LogOp::Expire { key: key.clone() });
        }
        Ok(due.len())
    }

    /// Returns the number of live records.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.view()?.records.live_len(self.manager.now()))
    }

    /// Returns true if there are no live records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the remaining time-to-live of a record, or `None` if it never
    /// expires.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the key is absent or expired.
    pub fn ttl(&self, key: &str) -> CoreResult<Option<Duration>> {
        let now = self.manager.now();
        let record = self.view()?.records.get(key, now).ok_or(CoreError::NotFound)?;
        Ok(record.expires_at.and_then(|at| at.remaining_since(now)))
    }

    /// Iterates live `(key, value)` pairs with `from <= key < to` in key
    /// order. Either bound may be open.
    pub fn ascend(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> CoreResult<impl Iterator<Item = (&str, &str)> + '_> {
        let now = self.manager.now();
        Ok(self
            .view()?
            .records
            .ascend(from, to, now)
            .map(|(key, record)| (key, record.value.as_str())))
    }

    /// Iterates live `(key, value)` pairs with `to < key <= from` in reverse
    /// key order. Either bound may be open.
    pub fn descend(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> CoreResult<impl Iterator<Item = (&str, &str)> + '_> {
        let now = self.manager.now();
        Ok(self
            .view()?
            .records
            .descend(from, to, now)
            .map(|(key, record)| (key, record.value.as_str())))
    }

    /// Iterates live records whose key matches a glob pattern, in key order.
    pub fn ascend_matching(
        &self,
        pattern: &str,
    ) -> CoreResult<impl Iterator<Item = (&str, &str)> + '_> {
        let pattern = Pattern::new(pattern);
        Ok(self
            .ascend(None, None)?
            .filter(move |(key, _)| pattern.matches(key)))
    }

    /// Creates a secondary index and fills it from the current records.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateIndex`] if the name is taken.
    pub fn create_index(&mut self, def: IndexDef) -> CoreResult<()> {
        let access = self.access()?;
        let CommittedState {
            records, indexes, ..
        } = &mut access.working;
        indexes.create(def, records)?;
        access.indexes_changed = true;
        Ok(())
    }

    /// Drops a secondary index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no index has this name.
    pub fn drop_index(&mut self, name: &str) -> CoreResult<()> {
        let access = self.access()?;
        access.working.indexes.drop_index(name)?;
        access.indexes_changed = true;
        Ok(())
    }

    /// Returns the names of all indexes.
    pub fn indexes(&self) -> CoreResult<Vec<String>> {
        Ok(self.view()?.indexes.names().map(str::to_owned).collect())
    }

    /// Iterates live `(key, value)` pairs of an index with
    /// `from <= value < to` in index order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the index does not exist.
    pub fn ascend_index(
        &self,
        name: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> CoreResult<impl Iterator<Item = (&str, &str)> + '_> {
        let now = self.manager.now();
        Ok(self.view()?.indexes.get(name)?.ascend(from, to, now))
    }

    /// Iterates live `(key, value)` pairs of an index with
    /// `to < value <= from` in reverse index order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the index does not exist.
    pub fn descend_index(
        &self,
        name: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> CoreResult<impl Iterator<Item = (&str, &str)> + '_> {
        let now = self.manager.now();
        Ok(self.view()?.indexes.get(name)?.descend(from, to, now))
    }

    /// Commits the transaction.
    ///
    /// For a write transaction, the write-buffer is logged and published
    /// atomically. If logging fails the transaction ends rolled back and
    /// the error is [`CoreError::CommitFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ManagedTransaction`] inside `view`/`update`, and
    /// [`CoreError::TransactionClosed`] if the transaction already finished.
    pub fn commit(&mut self) -> CoreResult<()> {
        if self.managed {
            return Err(CoreError::ManagedTransaction);
        }
        self.finish_commit()
    }

    /// Rolls back the transaction, discarding every change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ManagedTransaction`] inside `view`/`update`, and
    /// [`CoreError::TransactionClosed`] if the transaction already finished.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if self.managed {
            return Err(CoreError::ManagedTransaction);
        }
        self.finish_rollback()
    }

    pub(crate) fn finish_commit(&mut self) -> CoreResult<()> {
        match self.mode.take() {
            None => Err(CoreError::TransactionClosed),
            Some(Mode::Read(_)) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Some(Mode::Write(access)) => match self.manager.commit_write(self.id, access) {
                Ok(_) => {
                    self.state = TransactionState::Committed;
                    Ok(())
                }
                Err(e) => {
                    self.state = TransactionState::RolledBack;
                    Err(e)
                }
            },
        }
    }

    pub(crate) fn finish_rollback(&mut self) -> CoreResult<()> {
        match self.mode.take() {
            None => Err(CoreError::TransactionClosed),
            Some(_) => {
                self.state = TransactionState::RolledBack;
                Ok(())
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.mode.is_some() {
            let _ = self.finish_rollback();
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("writable", &self.is_writable())
            .finish_non_exhaustive()
    }
}
