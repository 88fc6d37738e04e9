//! Key ordering.

use std::cmp::Ordering;
use std::fmt;

/// Total order of a database's key space.
///
/// Every variant breaks ties on raw byte order, so two keys compare equal
/// only when they are byte-identical.
#[derive(Clone, Copy, Default)]
pub enum KeyOrder {
    /// Byte-lexicographic order.
    #[default]
    Lexicographic,
    /// ASCII case-insensitive order.
    CaseInsensitive,
    /// Descending byte order.
    Reverse,
    /// Caller-supplied comparison.
    Custom(fn(&str, &str) -> Ordering),
}

impl KeyOrder {
    /// Compares two keys under this order.
    #[must_use]
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        let primary = match self {
            Self::Lexicographic => Ordering::Equal,
            Self::CaseInsensitive => compare_ascii_case_insensitive(a, b),
            Self::Reverse => return b.as_bytes().cmp(a.as_bytes()),
            Self::Custom(compare) => compare(a, b),
        };
        primary.then_with(|| a.as_bytes().cmp(b.as_bytes()))
    }
}

impl fmt::Debug for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexicographic => f.write_str("Lexicographic"),
            Self::CaseInsensitive => f.write_str("CaseInsensitive"),
            Self::Reverse => f.write_str("Reverse"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub(crate) fn compare_ascii_case_insensitive(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// A key tagged with the order of the store it lives in.
///
/// `BTreeMap` needs a static `Ord`; carrying the (copyable) order with each
/// key lets one map type serve every configured key order.
#[derive(Clone)]
pub(crate) struct StoreKey {
    key: String,
    order: KeyOrder,
}

impl StoreKey {
    pub(crate) fn new(key: impl Into<String>, order: KeyOrder) -> Self {
        Self {
            key: key.into(),
            order,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.key, f)
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StoreKey {}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.key, &other.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(order: KeyOrder, keys: &[&str]) -> Vec<String> {
        let mut keys: Vec<StoreKey> = keys.iter().map(|k| StoreKey::new(*k, order)).collect();
        keys.sort();
        keys.into_iter().map(|k| k.key).collect()
    }

    #[test]
    fn lexicographic_is_byte_order() {
        assert_eq!(sorted(KeyOrder::Lexicographic, &["b", "B", "a"]), vec!["B", "a", "b"]);
    }

    #[test]
    fn case_insensitive_breaks_ties_by_bytes() {
        assert_eq!(
            sorted(KeyOrder::CaseInsensitive, &["b", "B", "a", "A"]),
            vec!["A", "a", "B", "b"]
        );
    }

    #[test]
    fn reverse_descends() {
        assert_eq!(sorted(KeyOrder::Reverse, &["a", "c", "b"]), vec!["c", "b", "a"]);
    }

    #[test]
    fn custom_order_by_length() {
        fn by_len(a: &str, b: &str) -> Ordering {
            a.len().cmp(&b.len())
        }
        assert_eq!(
            sorted(KeyOrder::Custom(by_len), &["ccc", "b", "aa", "a"]),
            vec!["a", "b", "aa", "ccc"]
        );
        assert_eq!(format!("{:?}", KeyOrder::Custom(by_len)), "Custom(..)");
    }
}
