//! Record store.
//!
//! The [`RecordStore`] holds every record of a database in key order, plus a
//! secondary set ordered by expiration time so sweeps only visit keys that
//! have actually expired. Both live in [`CowMap`]s, so cloning a store is the
//! snapshot operation: it costs two `Arc` clones and the clone never sees
//! later writes.
//!
//! Expired records stay in the store until a sweep removes them, but every
//! read path (`get`, `ascend`, `descend`) filters them against the caller's
//! `now`.

mod cow_map;
mod key;
mod record;

pub use cow_map::CowMap;
pub use key::KeyOrder;
pub(crate) use key::{compare_ascii_case_insensitive, StoreKey};
pub use record::Record;

use crate::types::Timestamp;
use std::ops::Bound;

/// Ordered key space of one database.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: CowMap<StoreKey, Record>,
    expirations: CowMap<(Timestamp, String), ()>,
    order: KeyOrder,
}

impl RecordStore {
    /// Creates an empty store ordered by `order`.
    #[must_use]
    pub fn new(order: KeyOrder) -> Self {
        Self {
            records: CowMap::new(),
            expirations: CowMap::new(),
            order,
        }
    }

    /// Returns the key order.
    #[must_use]
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    fn store_key(&self, key: &str) -> StoreKey {
        StoreKey::new(key, self.order)
    }

    /// Inserts or replaces a record, returning the previous one.
    ///
    /// The previous record is returned even if it had already expired.
    pub fn put(&mut self, key: &str, record: Record) -> Option<Record> {
        if let Some(at) = record.expires_at {
            self.expirations.insert((at, key.to_owned()), ());
        }
        let previous = self.records.insert(self.store_key(key), record);
        if let Some(at) = previous.as_ref().and_then(|p| p.expires_at) {
            let unchanged = self
                .records
                .get(&self.store_key(key))
                .is_some_and(|current| current.expires_at == Some(at));
            if !unchanged {
                self.expirations.remove(&(at, key.to_owned()));
            }
        }
        previous
    }

    /// Looks up a live record.
    #[must_use]
    pub fn get(&self, key: &str, now: Timestamp) -> Option<&Record> {
        self.get_raw(key).filter(|record| !record.is_expired(now))
    }

    /// Looks up a record without checking expiration.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&Record> {
        self.records.get(&self.store_key(key))
    }

    /// Removes a record, returning it even if it had expired.
    pub fn delete(&mut self, key: &str) -> Option<Record> {
        let removed = self.records.remove(&self.store_key(key))?;
        if let Some(at) = removed.expires_at {
            self.expirations.remove(&(at, key.to_owned()));
        }
        Some(removed)
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
        self.expirations.clear();
    }

    /// Iterates live records with `from <= key < to` in key order.
    pub fn ascend<'a>(
        &'a self,
        from: Option<&str>,
        to: Option<&str>,
        now: Timestamp,
    ) -> impl Iterator<Item = (&'a str, &'a Record)> + 'a {
        let lo = from.map_or(Bound::Unbounded, |k| Bound::Included(self.store_key(k)));
        let hi = to.map_or(Bound::Unbounded, |k| Bound::Excluded(self.store_key(k)));
        self.records
            .range(lo, hi)
            .filter(move |(_, record)| !record.is_expired(now))
            .map(|(key, record)| (key.as_str(), record))
    }

    /// Iterates live records with `to < key <= from` in reverse key order.
    pub fn descend<'a>(
        &'a self,
        from: Option<&str>,
        to: Option<&str>,
        now: Timestamp,
    ) -> impl Iterator<Item = (&'a str, &'a Record)> + 'a {
        let lo = to.map_or(Bound::Unbounded, |k| Bound::Excluded(self.store_key(k)));
        let hi = from.map_or(Bound::Unbounded, |k| Bound::Included(self.store_key(k)));
        self.records
            .range(lo, hi)
            .rev()
            .filter(move |(_, record)| !record.is_expired(now))
            .map(|(key, record)| (key.as_str(), record))
    }

    /// Iterates every stored record, expired or not, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> + '_ {
        self.records.iter().map(|(key, record)| (key.as_str(), record))
    }

    /// Returns the keys whose expiration is at or before `now`, soonest first.
    pub fn expired(&self, now: Timestamp) -> impl Iterator<Item = &str> + '_ {
        self.expirations
            .iter()
            .take_while(move |((at, _), ())| *at <= now)
            .map(|((_, key), ())| key.as_str())
    }

    /// Returns the number of stored records, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of records visible at `now`.
    #[must_use]
    pub fn live_len(&self, now: Timestamp) -> usize {
        self.records.len() - self.expired(now).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn keys<'a>(iter: impl Iterator<Item = (&'a str, &'a Record)>) -> Vec<&'a str> {
        iter.map(|(k, _)| k).collect()
    }

    fn store_with(keys: &[&str]) -> RecordStore {
        let mut store = RecordStore::default();
        for key in keys {
            store.put(key, Record::new(key.to_uppercase()));
        }
        store
    }

    #[test]
    fn put_get_delete() {
        let mut store = RecordStore::default();
        assert_eq!(store.put("a", Record::new("1")), None);
        assert_eq!(store.put("a", Record::new("2")), Some(Record::new("1")));
        assert_eq!(store.get("a", ts(0)).map(|r| r.value.as_str()), Some("2"));
        assert_eq!(store.delete("a"), Some(Record::new("2")));
        assert_eq!(store.delete("a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn expired_records_are_hidden_but_stored() {
        let mut store = RecordStore::default();
        store.put("a", Record::expiring("1", ts(100)));
        store.put("b", Record::new("2"));

        assert!(store.get("a", ts(99)).is_some());
        assert!(store.get("a", ts(100)).is_none());
        assert!(store.get_raw("a").is_some());
        assert_eq!(keys(store.ascend(None, None, ts(100))), vec!["b"]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.live_len(ts(100)), 1);
    }

    #[test]
    fn ascend_and_descend_ranges() {
        let store = store_with(&["a", "b", "c", "d"]);
        assert_eq!(keys(store.ascend(Some("b"), Some("d"), ts(0))), vec!["b", "c"]);
        assert_eq!(keys(store.ascend(None, None, ts(0))), vec!["a", "b", "c", "d"]);
        assert_eq!(keys(store.descend(Some("c"), Some("a"), ts(0))), vec!["c", "b"]);
        assert_eq!(keys(store.descend(None, None, ts(0))), vec!["d", "c", "b", "a"]);
        assert_eq!(keys(store.ascend(Some("d"), Some("b"), ts(0))).len(), 0);
    }

    #[test]
    fn expiration_index_follows_updates() {
        let mut store = RecordStore::default();
        store.put("a", Record::expiring("1", ts(10)));
        store.put("b", Record::expiring("2", ts(5)));
        assert_eq!(store.expired(ts(20)).collect::<Vec<_>>(), vec!["b", "a"]);

        // Re-setting without a TTL clears the pending expiration.
        store.put("a", Record::new("1"));
        assert_eq!(store.expired(ts(20)).collect::<Vec<_>>(), vec!["b"]);

        // Re-setting with the same deadline keeps it.
        store.put("b", Record::expiring("3", ts(5)));
        assert_eq!(store.expired(ts(5)).collect::<Vec<_>>(), vec!["b"]);

        store.delete("b");
        assert_eq!(store.expired(ts(20)).count(), 0);
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut store = store_with(&["a", "b"]);
        let snapshot = store.clone();
        store.put("c", Record::new("C"));
        store.delete("a");
        assert_eq!(keys(snapshot.ascend(None, None, ts(0))), vec!["a", "b"]);
        assert_eq!(keys(store.ascend(None, None, ts(0))), vec!["b", "c"]);
    }

    #[test]
    fn reverse_key_order() {
        let mut store = RecordStore::new(KeyOrder::Reverse);
        for key in ["a", "b", "c"] {
            store.put(key, Record::new(key));
        }
        assert_eq!(keys(store.ascend(None, None, ts(0))), vec!["c", "b", "a"]);
        assert_eq!(keys(store.ascend(Some("b"), None, ts(0))), vec!["b", "a"]);
    }
}
