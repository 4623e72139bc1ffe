//! A monotonic state-change index, the Rust realization of the
//! "mutex + condition variable" tracker the spec describes: `List`
//! callers block on [`Tracker::wait_for_change`] instead of polling,
//! and any state-mutating operation calls [`Tracker::bump`] exactly
//! once after it commits its change.

use tokio::sync::Notify;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use crate::{ManagerError, Result};

/// Guards a 64-bit index that increases by exactly one on every
/// observable registry change (create, pause, resume, terminate, or a
/// controller's own status transition), plus a poison flag set on
/// shutdown.
#[derive(Default)]
pub struct Tracker {
    index: AtomicU64,
    poisoned: AtomicBool,
    changed: Notify,
}

impl Tracker {
    /// Creates a tracker starting at index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current index without waiting.
    pub fn current(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    /// Advances the index by one and wakes every waiter.
    pub fn bump(&self) {
        self.index.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Marks the tracker poisoned (on manager shutdown) and wakes
    /// every waiter so they observe [`ManagerError::Poisoned`] rather
    /// than blocking forever.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Blocks until the index exceeds `previous`, the tracker is
    /// poisoned, or `cancel` fires, whichever comes first.
    pub async fn wait_for_change(&self, previous: u64, cancel: &CancellationToken) -> Result<u64> {
        loop {
            if self.poisoned.load(Ordering::SeqCst) {
                return Err(ManagerError::Poisoned);
            }
            let current = self.current();
            if current > previous {
                return Ok(current);
            }
            let notified = self.changed.notified();
            tokio::select! {
                () = cancel.cancelled() => return Err(ManagerError::Cancelled),
                () = notified => {}
            }
        }
    }
}
