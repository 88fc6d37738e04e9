//! Secondary indexes.
//!
//! An index keeps the records whose key matches its [`Pattern`] (and whose
//! value passes its optional predicate) ordered by a [`ValueOrder`] over
//! their values. Equal values fall back to key byte order, so iteration
//! order is always deterministic.
//!
//! Indexes live next to the [`RecordStore`] inside each committed state and
//! are cloned with it, so a snapshot sees exactly the index contents of the
//! commit it was taken from. The [`IndexSet`] is updated on every record
//! mutation made through a write transaction.
//!
//! Definitions may hold closures and are never persisted; they are supplied
//! when a database is opened or created at runtime, and rebuilt from the
//! record store.

mod order;
mod pattern;

pub use order::{CompareFn, ValueOrder};
pub use pattern::Pattern;

use crate::error::{CoreError, CoreResult};
use crate::store::{CowMap, Record, RecordStore};
use crate::types::Timestamp;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

/// A predicate deciding whether a value belongs in an index.
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Definition of a secondary index.
#[derive(Clone)]
pub struct IndexDef {
    name: String,
    pattern: Pattern,
    order: Arc<ValueOrder>,
    predicate: Option<Predicate>,
}

impl IndexDef {
    /// Defines an index over keys matching `pattern`, ordered by `order`.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: impl Into<Pattern>, order: ValueOrder) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            order: Arc::new(order),
            predicate: None,
        }
    }

    /// Only index values for which `predicate` returns true.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key pattern.
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Returns the value order.
    #[must_use]
    pub fn order(&self) -> &ValueOrder {
        &self.order
    }

    /// Returns true if a record with this key and value belongs in the index.
    #[must_use]
    pub fn admits(&self, key: &str, value: &str) -> bool {
        self.pattern.matches(key) && self.predicate.as_ref().map_or(true, |p| p(value))
    }
}

impl fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("order", &self.order)
            .field("predicate", &self.predicate.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Position of an entry among entries with an equal value.
///
/// `Min` and `Max` never hold records; they are range pivots that sort
/// before and after every key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKey {
    Min,
    Key(String),
    Max,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    value: String,
    key: EntryKey,
    order: Arc<ValueOrder>,
}

impl IndexEntry {
    fn pivot(value: &str, key: EntryKey, order: &Arc<ValueOrder>) -> Self {
        Self {
            value: value.to_owned(),
            key,
            order: Arc::clone(order),
        }
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(&self.value, &other.value)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// A secondary ordering over a subset of records.
#[derive(Debug, Clone)]
pub struct Index {
    def: Arc<IndexDef>,
    entries: CowMap<IndexEntry, Option<Timestamp>>,
}

impl Index {
    /// Builds an index from every stored record.
    fn build(def: IndexDef, store: &RecordStore) -> Self {
        let mut index = Self {
            def: Arc::new(def),
            entries: CowMap::new(),
        };
        for (key, record) in store.iter() {
            index.insert(key, record);
        }
        index
    }

    /// Returns the definition.
    #[must_use]
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Returns the number of indexed records, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: &str, value: &str) -> IndexEntry {
        IndexEntry::pivot(value, EntryKey::Key(key.to_owned()), &self.def.order)
    }

    fn insert(&mut self, key: &str, record: &Record) {
        if self.def.admits(key, &record.value) {
            let entry = self.entry(key, &record.value);
            self.entries.insert(entry, record.expires_at);
        }
    }

    fn remove(&mut self, key: &str, record: &Record) {
        if self.def.admits(key, &record.value) {
            let entry = self.entry(key, &record.value);
            self.entries.remove(&entry);
        }
    }

    /// Iterates live entries with `from <= value < to` in index order.
    pub fn ascend<'a>(
        &'a self,
        from: Option<&str>,
        to: Option<&str>,
        now: Timestamp,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let order = &self.def.order;
        let lo = from.map_or(Bound::Unbounded, |v| {
            Bound::Included(IndexEntry::pivot(v, EntryKey::Min, order))
        });
        let hi = to.map_or(Bound::Unbounded, |v| {
            Bound::Excluded(IndexEntry::pivot(v, EntryKey::Min, order))
        });
        live(self.entries.range(lo, hi), now)
    }

    /// Iterates live entries with `to < value <= from` in reverse index order.
    pub fn descend<'a>(
        &'a self,
        from: Option<&str>,
        to: Option<&str>,
        now: Timestamp,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let order = &self.def.order;
        let lo = to.map_or(Bound::Unbounded, |v| {
            Bound::Excluded(IndexEntry::pivot(v, EntryKey::Max, order))
        });
        let hi = from.map_or(Bound::Unbounded, |v| {
            Bound::Included(IndexEntry::pivot(v, EntryKey::Max, order))
        });
        live(self.entries.range(lo, hi).rev(), now)
    }
}

fn live<'a>(
    entries: impl Iterator<Item = (&'a IndexEntry, &'a Option<Timestamp>)> + 'a,
    now: Timestamp,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    entries.filter_map(move |(entry, expires_at)| {
        if expires_at.is_some_and(|at| now >= at) {
            return None;
        }
        match &entry.key {
            EntryKey::Key(key) => Some((key.as_str(), entry.value.as_str())),
            EntryKey::Min | EntryKey::Max => None,
        }
    })
}

/// The indexes of one database, by name.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    indexes: BTreeMap<String, Index>,
}

impl IndexSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index and fills it from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateIndex`] if the name is taken.
    pub fn create(&mut self, def: IndexDef, store: &RecordStore) -> CoreResult<()> {
        if self.indexes.contains_key(def.name()) {
            return Err(CoreError::duplicate_index(def.name()));
        }
        let name = def.name().to_owned();
        self.indexes.insert(name, Index::build(def, store));
        Ok(())
    }

    /// Removes an index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no index has this name.
    pub fn drop_index(&mut self, name: &str) -> CoreResult<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    /// Looks up an index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no index has this name.
    pub fn get(&self, name: &str) -> CoreResult<&Index> {
        self.indexes.get(name).ok_or(CoreError::NotFound)
    }

    /// Returns index names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.indexes.keys().map(String::as_str)
    }

    /// Returns the number of indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns true if no index is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Rebuilds every index from `store`, keeping the definitions.
    pub fn rebuild(&mut self, store: &RecordStore) {
        for index in self.indexes.values_mut() {
            let def = IndexDef::clone(&index.def);
            *index = Index::build(def, store);
        }
    }

    /// Applies a record write.
    pub fn on_put(&mut self, key: &str, previous: Option<&Record>, record: &Record) {
        for index in self.indexes.values_mut() {
            if let Some(previous) = previous {
                index.remove(key, previous);
            }
            index.insert(key, record);
        }
    }

    /// Applies a record removal.
    pub fn on_delete(&mut self, key: &str, removed: &Record) {
        for index in self.indexes.values_mut() {
            index.remove(key, removed);
        }
    }

    /// Empties every index, keeping the definitions.
    pub fn clear(&mut self) {
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }
}
