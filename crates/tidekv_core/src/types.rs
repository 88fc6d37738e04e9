//! Core type definitions for tidekv.

use std::fmt;
use std::time::Duration;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// process. They only label transactions in logs and debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Sequence number for ordering commits.
///
/// Every published commit gets the next sequence number, and every snapshot
/// is labelled with the sequence number of the commit it reflects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Expirations are stored as absolute timestamps so they survive restarts
/// unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns this instant shifted forward by `ttl`, saturating at the far future.
    #[must_use]
    pub fn saturating_add(self, ttl: Duration) -> Self {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Returns the time remaining from `now` until this instant, if any.
    #[must_use]
    pub fn remaining_since(self, now: Timestamp) -> Option<Duration> {
        self.0
            .checked_sub(now.0)
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        assert!(TransactionId::new(1) < TransactionId::new(2));
        assert_eq!(format!("{}", TransactionId::new(9)), "txn:9");
    }

    #[test]
    fn sequence_number_next() {
        let s1 = SequenceNumber::new(5);
        assert_eq!(s1.next().as_u64(), 6);
        assert_eq!(format!("{s1}"), "seq:5");
    }

    #[test]
    fn timestamp_arithmetic() {
        let t0 = Timestamp::from_millis(1_000);
        let deadline = t0.saturating_add(Duration::from_secs(2));
        assert_eq!(deadline.as_millis(), 3_000);
        assert_eq!(deadline.remaining_since(t0), Some(Duration::from_secs(2)));
        assert_eq!(deadline.remaining_since(deadline), None);
        assert_eq!(deadline.remaining_since(Timestamp::from_millis(9_000)), None);
    }

    #[test]
    fn timestamp_saturates() {
        let t = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(t.saturating_add(Duration::from_secs(10)).as_millis(), u64::MAX);
    }
}
