//! Database configuration.

use crate::clock::{Clock, SystemClock};
use crate::index::IndexDef;
use crate::store::KeyOrder;
use std::sync::Arc;
use std::time::Duration;

/// When committed data is forced to durable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Only flush to the operating system; never fsync.
    Never,
    /// Flush each commit; the maintenance thread fsyncs about once a second.
    EverySecond,
    /// Fsync every commit before it becomes visible.
    #[default]
    Always,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Durability of each commit.
    pub sync_policy: SyncPolicy,

    /// How long a write transaction waits for write access before failing
    /// with `Busy` (`None` waits forever).
    pub write_timeout: Option<Duration>,

    /// Total order of the key space.
    pub key_order: KeyOrder,

    /// Compact once the log has grown by this percentage since the last
    /// compaction (0 disables automatic compaction).
    pub auto_compact_percentage: u32,

    /// Never compact automatically while the log is smaller than this.
    pub auto_compact_min_size: u64,

    /// Period of the background sync/sweep/compact thread (`None` disables it).
    pub maintenance_interval: Option<Duration>,

    /// Indexes to build when the database opens.
    pub indexes: Vec<IndexDef>,

    /// Time source for expirations.
    pub clock: Arc<dyn Clock>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_policy: SyncPolicy::Always,
            write_timeout: None,
            key_order: KeyOrder::Lexicographic,
            auto_compact_percentage: 100,
            auto_compact_min_size: 32 * 1024 * 1024, // 32 MB
            maintenance_interval: Some(Duration::from_secs(1)),
            indexes: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub const fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets the write-access deadline.
    #[must_use]
    pub const fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the key order.
    #[must_use]
    pub const fn key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    /// Sets the growth percentage that triggers automatic compaction.
    #[must_use]
    pub const fn auto_compact_percentage(mut self, percentage: u32) -> Self {
        self.auto_compact_percentage = percentage;
        self
    }

    /// Sets the minimum log size for automatic compaction.
    #[must_use]
    pub const fn auto_compact_min_size(mut self, size: u64) -> Self {
        self.auto_compact_min_size = size;
        self
    }

    /// Sets the maintenance period.
    #[must_use]
    pub const fn maintenance_interval(mut self, interval: Option<Duration>) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Registers an index to build at open.
    #[must_use]
    pub fn index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
