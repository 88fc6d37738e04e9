//! Background maintenance.
//!
//! One thread per database wakes every `maintenance_interval` and
//! - fsyncs commits deferred by [`SyncPolicy::EverySecond`](crate::SyncPolicy::EverySecond)
//! - removes expired records
//! - compacts the log once it has grown past the configured threshold
//!
//! The thread only holds the transaction manager, never the database
//! handle, so dropping the handle always stops it.

use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionManager;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Thresholds for automatic compaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AutoCompact {
    pub(crate) percentage: u32,
    pub(crate) min_size: u64,
}

/// Stop flag the worker sleeps on.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleeps up to `timeout`; returns true once stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

/// Handle to a running maintenance thread.
#[derive(Debug)]
pub(crate) struct Maintenance {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    /// Starts the maintenance thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub(crate) fn start(
        manager: Arc<TransactionManager>,
        interval: Duration,
        compact: AutoCompact,
    ) -> CoreResult<Self> {
        let signal = Arc::new(StopSignal::default());
        let worker_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("tidekv-maintenance".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "maintenance started");
                while !worker_signal.wait(interval) {
                    if manager.is_closed() {
                        break;
                    }
                    run_once(&manager, compact);
                }
                debug!("maintenance stopped");
            })?;
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to finish its current pass.
    pub(crate) fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One maintenance pass. Failures are logged and retried next pass.
pub(crate) fn run_once(manager: &TransactionManager, compact: AutoCompact) {
    if let Err(e) = manager.sync_pending() {
        warn!(error = %e, "deferred log sync failed");
    }

    match sweep(manager, false) {
        Ok(_) | Err(CoreError::Busy | CoreError::DatabaseClosed) => {}
        Err(e) => warn!(error = %e, "expiry sweep failed"),
    }

    match manager.should_compact(compact.percentage, compact.min_size) {
        Ok(true) => {
            if let Err(e) = manager.compact() {
                warn!(error = %e, "automatic compaction failed");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not check log size"),
    }
}

/// Deletes every expired record in one write transaction.
///
/// With `wait` false the sweep is skipped with [`CoreError::Busy`] if a
/// writer is active. Returns the number of records removed.
pub(crate) fn sweep(manager: &TransactionManager, wait: bool) -> CoreResult<usize> {
    let mut tx = if wait {
        manager.begin_write()?
    } else {
        manager.try_begin_write()?
    };
    let removed = tx.expire_due()?;
    tx.finish_commit()?;
    if removed > 0 {
        debug!(removed, sequence = %manager.committed_seq(), "expired records swept");
    }
    Ok(removed)
}
