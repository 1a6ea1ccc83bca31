//! Session table with lazy expiry checks and a periodic sweep.
//!
//! Sessions are touched on nearly every request, so instead of one timer per
//! session the sweeper scans the table on a fixed interval. Staleness is
//! bounded by that interval; `is_active` and `touch` also check the deadline
//! themselves so an expired session is never reported active.
//!
//! The deadline check and the removal for one session happen under the same
//! shard lock in both `touch` and the sweep. A touch that lands first
//! extends the session and the sweep's re-check leaves it alone; a sweep that
//! lands first removes it and the touch reports "not found".
//!
//! An expired session also archives every post it created.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::clock::{chrono_span, Clock};
use crate::lifecycle::metrics::LifecycleMetrics;
use crate::lifecycle::registry::{ExpiryHandler, ExpiryRegistry};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub user_id: String,
    /// Posts created in this session, archived when the session expires.
    pub post_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions removed.
    pub expired: usize,
    /// Owned posts handed to archival.
    pub posts_expired: usize,
}

pub struct SessionSweeper<H> {
    sessions: DashMap<String, SessionEntry>,
    posts: ExpiryRegistry<H>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LifecycleMetrics>,
    lifetime: Duration,
}

impl<H: ExpiryHandler> SessionSweeper<H> {
    pub fn new(
        posts: ExpiryRegistry<H>,
        clock: Arc<dyn Clock>,
        metrics: Arc<LifecycleMetrics>,
        lifetime: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            posts,
            clock,
            metrics,
            lifetime,
        }
    }

    /// Start tracking a new session. Replaces any entry with the same id.
    pub fn insert(&self, session_id: &str, user_id: &str) -> DateTime<Utc> {
        let expires_at = self.clock.now() + chrono_span(self.lifetime);
        self.sessions.insert(
            session_id.to_owned(),
            SessionEntry {
                user_id: user_id.to_owned(),
                post_ids: Vec::new(),
                expires_at,
            },
        );
        tracing::debug!(session = %session_id, user = %user_id, expires_at = %expires_at, "session started");
        expires_at
    }

    /// Add a post to a live session's owned posts. Returns false if the
    /// session is gone or already expired.
    pub fn attach_post(&self, session_id: &str, post_id: &str) -> bool {
        let now = self.clock.now();
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if now > entry.expires_at {
            return false;
        }
        if !entry.post_ids.iter().any(|p| p == post_id) {
            entry.post_ids.push(post_id.to_owned());
        }
        true
    }

    /// Move a live session's deadline to `new_expires_at`.
    ///
    /// Fails if the session is absent or its deadline already passed; the
    /// caller must then start a new session. Expired entries are left for
    /// the sweeper so their owned posts still get archived.
    pub fn touch(&self, session_id: &str, new_expires_at: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if now > entry.expires_at {
            return false;
        }
        entry.expires_at = new_expires_at;
        true
    }

    /// Touch with a full lifetime from now.
    pub fn refresh(&self, session_id: &str) -> bool {
        let new_expires_at = self.clock.now() + chrono_span(self.lifetime);
        self.touch(session_id, new_expires_at)
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        let now = self.clock.now();
        self.sessions
            .get(session_id)
            .map(|entry| now <= entry.expires_at)
            .unwrap_or(false)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn expired_candidates(&self, now: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|r| now > r.value().expires_at)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Remove `session_id` only if it is still expired at `now`.
    fn remove_if_expired(&self, session_id: &str, now: DateTime<Utc>) -> Option<(String, SessionEntry)> {
        self.sessions
            .remove_if(session_id, |_, entry| now > entry.expires_at)
    }

    /// Remove every session whose deadline has passed and return them.
    pub fn expire_due(&self) -> Vec<(String, SessionEntry)> {
        let now = self.clock.now();
        self.expired_candidates(now)
            .into_iter()
            .filter_map(|id| self.remove_if_expired(&id, now))
            .collect()
    }

    /// One sweep: remove expired sessions, then archive the posts they owned.
    /// Archival runs after removal, outside any table lock.
    pub async fn sweep_once(&self) -> SweepReport {
        let expired = self.expire_due();
        let mut report = SweepReport {
            expired: expired.len(),
            posts_expired: 0,
        };

        for (session_id, entry) in expired {
            LifecycleMetrics::incr(&self.metrics.sessions_expired);
            tracing::debug!(session = %session_id, user = %entry.user_id, "session expired");
            for post_id in entry.post_ids {
                if self.posts.expire_now(&post_id).await {
                    report.posts_expired += 1;
                }
            }
        }

        report
    }

    /// Sweep on a fixed interval until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "session sweeper started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.sweep_once().await;
            if report.expired > 0 {
                tracing::info!(
                    expired = report.expired,
                    posts = report.posts_expired,
                    "session sweep complete"
                );
            }
        }

        tracing::info!("session sweeper stopped");
    }
}
