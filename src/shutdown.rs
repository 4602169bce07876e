//! Two-stage Ctrl+C handling for scheduled runs.
//!
//! A [`ShutdownCoordinator`] is shared between the signal task and the
//! scheduler so a run can stop without corrupting the checkpoint or leaving
//! a half-written result file behind.
//!
//! Shutdown has two stages:
//!
//! 1. **Graceful** - no new date or refresh iteration is started and idle
//!    sleeps end immediately, but a job that is already submitted keeps being
//!    polled so its result can still be retrieved.
//! 2. **Abort** - a second request also interrupts the poller, abandoning the
//!    in-flight job.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register the process-wide handle picked up by [`crate::downloader::Scheduler::new`].
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// The process-wide handle, if one was registered.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// How a sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed
    Elapsed,
    /// The sleep was cut short by a shutdown request
    Interrupted,
}

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    is_abort: AtomicBool,
    shutdown_notify: Notify,
    abort_notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request graceful shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.shutdown_notify.notify_waiters();
        }
    }

    /// Request an abort. Implies graceful shutdown.
    pub fn request_abort(&self) {
        self.request_shutdown();
        if !self.is_abort.swap(true, Ordering::SeqCst) {
            self.abort_notify.notify_waiters();
        }
    }

    /// Escalate: the first call requests shutdown, any later call aborts.
    ///
    /// Returns `true` if this call escalated to an abort.
    pub fn escalate(&self) -> bool {
        if self.is_shutdown_requested() {
            self.request_abort();
            true
        } else {
            self.request_shutdown();
            false
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Whether an abort has been requested.
    pub fn is_abort_requested(&self) -> bool {
        self.is_abort.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.shutdown_notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Wait until an abort is requested. Returns immediately if already set.
    pub async fn wait_for_abort(&self) {
        let notified = self.abort_notify.notified();
        if self.is_abort_requested() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    pub async fn sleep_unless_shutdown(&self, duration: Duration) -> SleepOutcome {
        if self.is_shutdown_requested() {
            return SleepOutcome::Interrupted;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
            _ = self.wait_for_shutdown() => SleepOutcome::Interrupted,
        }
    }

    /// Sleep for `duration` unless an abort is requested first.
    pub async fn sleep_unless_abort(&self, duration: Duration) -> SleepOutcome {
        if self.is_abort_requested() {
            return SleepOutcome::Interrupted;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
            _ = self.wait_for_abort() => SleepOutcome::Interrupted,
        }
    }
}
