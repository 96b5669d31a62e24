//! Controller statistics.
//!
//! All counters are atomic and monotonically increasing; they can be read while
//! transactions are in flight. Use [`ControllerStats::snapshot`] for a
//! consistent-enough copy suitable for logging or serialization.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction controller counters.
#[derive(Debug, Default)]
pub struct ControllerStats {
    // Creation
    reads_created: AtomicU64,
    updates_created: AtomicU64,
    admitted_immediately: AtomicU64,
    queued: AtomicU64,
    promoted: AtomicU64,

    // Reclassification
    upgrades_in_place: AtomicU64,
    upgrades_queued: AtomicU64,
    upgrades_rejected: AtomicU64,
    downgrades: AtomicU64,
    downgrades_rejected: AtomicU64,

    // Termination
    commits: AtomicU64,
    rollbacks: AtomicU64,
    restarts: AtomicU64,

    // Errors
    listener_failures: AtomicU64,
}

impl ControllerStats {
    /// Creates a zeroed stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self, update: bool) {
        if update {
            self.updates_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reads_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_admitted_immediately(&self) {
        self.admitted_immediately.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promoted(&self, count: u64) {
        self.promoted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_upgrade_in_place(&self) {
        self.upgrades_in_place.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upgrade_queued(&self) {
        self.upgrades_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upgrade_rejected(&self) {
        self.upgrades_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_downgrade(&self) {
        self.downgrades.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_downgrade_rejected(&self) {
        self.downgrades_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of listener invocations that panicked.
    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads_created: self.reads_created.load(Ordering::Relaxed),
            updates_created: self.updates_created.load(Ordering::Relaxed),
            admitted_immediately: self.admitted_immediately.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
            upgrades_in_place: self.upgrades_in_place.load(Ordering::Relaxed),
            upgrades_queued: self.upgrades_queued.load(Ordering::Relaxed),
            upgrades_rejected: self.upgrades_rejected.load(Ordering::Relaxed),
            downgrades: self.downgrades.load(Ordering::Relaxed),
            downgrades_rejected: self.downgrades_rejected.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`ControllerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Read transactions requested.
    pub reads_created: u64,
    /// Update transactions requested.
    pub updates_created: u64,
    /// Requests admitted without queueing.
    pub admitted_immediately: u64,
    /// Requests that had to queue.
    pub queued: u64,
    /// Queue entries admitted by promotion.
    pub promoted: u64,
    /// Upgrades completed in place.
    pub upgrades_in_place: u64,
    /// Upgrades that queued behind other readers.
    pub upgrades_queued: u64,
    /// Upgrades refused because the queue was not empty.
    pub upgrades_rejected: u64,
    /// Downgrades accepted.
    pub downgrades: u64,
    /// Downgrades refused because the transaction modified something.
    pub downgrades_rejected: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
    /// Prepared transactions restarted.
    pub restarts: u64,
    /// Completion listeners that panicked.
    pub listener_failures: u64,
}

impl StatsSnapshot {
    /// Total transactions requested.
    pub fn total_created(&self) -> u64 {
        self.reads_created + self.updates_created
    }

    /// Total transactions terminated.
    pub fn total_terminated(&self) -> u64 {
        self.commits + self.rollbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ControllerStats::new();
        stats.record_created(false);
        stats.record_created(true);
        stats.record_created(true);
        stats.record_promoted(3);
        stats.record_commit();
        stats.record_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.reads_created, 1);
        assert_eq!(snap.updates_created, 2);
        assert_eq!(snap.total_created(), 3);
        assert_eq!(snap.promoted, 3);
        assert_eq!(snap.total_terminated(), 2);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = ControllerStats::new();
        stats.record_listener_failure();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["listener_failures"], 1);
        assert_eq!(stats.listener_failures(), 1);
    }
}
