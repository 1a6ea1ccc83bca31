use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for lifecycle activity.
#[derive(Default)]
pub struct LifecycleMetrics {
    pub timers_armed: AtomicU64,
    pub timers_canceled: AtomicU64,
    /// Timer callbacks that woke after being superseded and did nothing.
    pub stale_fires: AtomicU64,
    pub posts_archived: AtomicU64,
    /// Archival calls that found the post already archived or gone.
    pub archive_noops: AtomicU64,
    pub archive_failures: AtomicU64,
    pub sessions_expired: AtomicU64,
    pub posts_reaped: AtomicU64,
    pub reap_failures: AtomicU64,
}

/// Point-in-time copy of [`LifecycleMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub timers_armed: u64,
    pub timers_canceled: u64,
    pub stale_fires: u64,
    pub posts_archived: u64,
    pub archive_noops: u64,
    pub archive_failures: u64,
    pub sessions_expired: u64,
    pub posts_reaped: u64,
    pub reap_failures: u64,
}

impl LifecycleMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timers_armed: self.timers_armed.load(Ordering::Relaxed),
            timers_canceled: self.timers_canceled.load(Ordering::Relaxed),
            stale_fires: self.stale_fires.load(Ordering::Relaxed),
            posts_archived: self.posts_archived.load(Ordering::Relaxed),
            archive_noops: self.archive_noops.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            posts_reaped: self.posts_reaped.load(Ordering::Relaxed),
            reap_failures: self.reap_failures.load(Ordering::Relaxed),
        }
    }
}
