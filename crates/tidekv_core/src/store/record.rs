//! Stored records.

use crate::types::Timestamp;

/// A value with an optional absolute expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The stored value.
    pub value: String,
    /// When the record stops being visible, if ever.
    pub expires_at: Option<Timestamp>,
}

impl Record {
    /// Creates a record that never expires.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates a record that expires at `expires_at`.
    #[must_use]
    pub fn expiring(value: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Returns true once `now` has reached the expiration.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let record = Record::expiring("v", Timestamp::from_millis(100));
        assert!(!record.is_expired(Timestamp::from_millis(99)));
        assert!(record.is_expired(Timestamp::from_millis(100)));
        assert!(record.is_expired(Timestamp::from_millis(101)));
    }

    #[test]
    fn persistent_record_never_expires() {
        assert!(!Record::new("v").is_expired(Timestamp::from_millis(u64::MAX)));
    }
}
