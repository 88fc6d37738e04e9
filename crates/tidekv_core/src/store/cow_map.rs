//! Chunked copy-on-write ordered map.
//!
//! A [`CowMap`] is an ordered map split into bounded chunks, each behind its
//! own `Arc`, with the chunk directory itself behind an `Arc`:
//!
//! ```text
//! Arc<directory> ──► [ "a" → Arc<chunk a..f>, "g" → Arc<chunk g..p>, "q" → Arc<chunk q..> ]
//! ```
//!
//! Cloning the map clones one `Arc`. The first mutation after a clone copies
//! the directory (one pointer per chunk) plus the single chunk it touches;
//! every other chunk stays shared with the snapshot it was cloned from. A
//! snapshot can therefore never observe a later write.
//!
//! ## Invariants
//!
//! - Chunk bounds partition the key space: every key `k` in the chunk bound
//!   at `b` satisfies `b <= k < next_bound`.
//! - No chunk is empty.
//! - `len` equals the sum of chunk lengths.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Chunks are split once they grow past this many entries.
pub(crate) const CHUNK_CAPACITY: usize = 128;

type Chunk<K, V> = BTreeMap<K, V>;

/// Ordered map with O(1) clones and chunk-granular copy-on-write.
#[derive(Debug)]
pub struct CowMap<K, V> {
    chunks: Arc<BTreeMap<K, Arc<Chunk<K, V>>>>,
    len: usize,
}

impl<K, V> Clone for CowMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            chunks: Arc::clone(&self.chunks),
            len: self.len,
        }
    }
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        Self {
            chunks: Arc::new(BTreeMap::new()),
            len: 0,
        }
    }
}

impl<K: Ord + Clone, V: Clone> CowMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if both maps still share their chunk directory.
    #[must_use]
    pub fn shares_directory_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chunks, &other.chunks)
    }

    /// Looks up a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let (_, chunk) = self.chunks.range::<K, _>(..=key).next_back()?;
        chunk.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a value, returning the previous value for the key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let chunks = Arc::make_mut(&mut self.chunks);
        let bound = Self::bound_for_insert(chunks, &key);

        let chunk = Arc::make_mut(chunks.entry(bound).or_default());
        let previous = chunk.insert(key, value);
        let split = if chunk.len() > CHUNK_CAPACITY {
            chunk
                .keys()
                .nth(chunk.len() / 2)
                .cloned()
                .map(|mid| {
                    let upper = chunk.split_off(&mid);
                    (mid, upper)
                })
        } else {
            None
        };

        if let Some((mid, upper)) = split {
            chunks.insert(mid, Arc::new(upper));
        }
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let bound = {
            let (bound, chunk) = self.chunks.range::<K, _>(..=key).next_back()?;
            if !chunk.contains_key(key) {
                // Nothing to remove; avoid copying shared chunks.
                return None;
            }
            bound.clone()
        };

        let chunks = Arc::make_mut(&mut self.chunks);
        let (removed, now_empty) = {
            let chunk = Arc::make_mut(chunks.get_mut(&bound)?);
            let removed = chunk.remove(key);
            (removed, chunk.is_empty())
        };
        if now_empty {
            chunks.remove(&bound);
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.chunks = Arc::new(BTreeMap::new());
        self.len = 0;
    }

    /// Iterates entries within `(lo, hi)` in ascending key order.
    ///
    /// Reverse with `.rev()`. An empty or inverted range yields nothing.
    pub fn range(
        &self,
        lo: Bound<K>,
        hi: Bound<K>,
    ) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        let chunks = if is_valid_range(lo.as_ref(), hi.as_ref()) {
            let start = match lo.as_ref() {
                Bound::Unbounded => Bound::Unbounded,
                Bound::Included(k) | Bound::Excluded(k) => self
                    .chunks
                    .range::<K, _>(..=k)
                    .next_back()
                    .map_or(Bound::Unbounded, |(bound, _)| Bound::Included(bound)),
            };
            Some(self.chunks.range((start, hi.as_ref())))
        } else {
            None
        };

        chunks
            .into_iter()
            .flatten()
            .flat_map(move |(_, chunk)| chunk.range((lo.as_ref(), hi.as_ref())))
    }

    /// Iterates all entries in ascending key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.chunks.values().flat_map(|chunk| chunk.iter())
    }

    /// Finds the chunk bound that should receive `key`, rebinding the first
    /// chunk when `key` sorts before every existing bound.
    fn bound_for_insert(chunks: &mut BTreeMap<K, Arc<Chunk<K, V>>>, key: &K) -> K {
        if let Some((bound, _)) = chunks.range::<K, _>(..=key).next_back() {
            return bound.clone();
        }
        let first = chunks.pop_first().map(|(_, chunk)| chunk).unwrap_or_default();
        chunks.insert(key.clone(), first);
        key.clone()
    }
}

/// Returns false for ranges that `BTreeMap::range` would reject.
fn is_valid_range<K: Ord>(lo: Bound<&K>, hi: Bound<&K>) -> bool {
    match (lo, hi) {
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            match a.cmp(b) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => {
                    !matches!((lo, hi), (Bound::Excluded(_), Bound::Excluded(_)))
                }
                std::cmp::Ordering::Greater => false,
            }
        }
        _ => true,
    }
}
