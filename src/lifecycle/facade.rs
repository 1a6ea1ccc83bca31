//! Lifecycle facade: the API request handlers call.
//!
//! Owns the post registry, the session table, and the two background loops.
//! Activity calls never fail from the caller's point of view: once shutdown
//! begins they become logged no-ops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::LifecycleConfig;
use crate::error::{FadeError, Result};
use crate::lifecycle::archive::{ArchivalTrigger, ArchiveOutcome};
use crate::lifecycle::clock::{Clock, TimerSource};
use crate::lifecycle::metrics::{LifecycleMetrics, MetricsSnapshot};
use crate::lifecycle::reaper::RetentionReaper;
use crate::lifecycle::registry::ExpiryRegistry;
use crate::lifecycle::sessions::SessionSweeper;
use crate::store::{LifecycleStore, PostActivity};

/// What `shutdown` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pending post timers canceled.
    pub timers_canceled: usize,
    /// Whether every in-flight task finished inside the timeout.
    pub drained: bool,
}

pub struct Lifecycle {
    posts: ExpiryRegistry<ArchivalTrigger>,
    sessions: Arc<SessionSweeper<ArchivalTrigger>>,
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    timers: TimerSource,
    metrics: Arc<LifecycleMetrics>,
    config: LifecycleConfig,
    cancel: CancellationToken,
}

impl Lifecycle {
    /// Build the manager on the current tokio runtime and start the session
    /// sweeper and retention reaper.
    pub fn start(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Result<Self> {
        let timers = TimerSource::current()?;
        Ok(Self::start_with(timers, store, clock, config))
    }

    /// Like [`Lifecycle::start`], for callers that hold a runtime handle but
    /// are not running inside it.
    pub fn start_on(
        handle: Handle,
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self::start_with(TimerSource::new(handle), store, clock, config)
    }

    fn start_with(
        timers: TimerSource,
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        let metrics = Arc::new(LifecycleMetrics::default());
        let trigger = ArchivalTrigger::new(store.clone(), clock.clone(), metrics.clone());
        let posts = ExpiryRegistry::new(trigger, timers.clone(), clock.clone(), metrics.clone());
        let sessions = Arc::new(SessionSweeper::new(
            posts.clone(),
            clock.clone(),
            metrics.clone(),
            config.session_lifetime,
        ));
        let reaper = Arc::new(RetentionReaper::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            config.retention,
        ));

        let cancel = CancellationToken::new();
        timers.spawn(sessions.clone().run(config.sweep_interval, cancel.clone()));
        timers.spawn(reaper.run(config.reaper_interval, cancel.clone()));

        tracing::info!(
            post_window_secs = config.post_window.as_secs(),
            session_lifetime_secs = config.session_lifetime.as_secs(),
            "lifecycle manager started"
        );

        Self {
            posts,
            sessions,
            store,
            clock,
            timers,
            metrics,
            config,
            cancel,
        }
    }

    /// Start the inactivity window for a new post.
    pub fn on_post_created(&self, id: &str) {
        self.rearm(id, "post created");
    }

    /// Push a post's deadline out by a full window (comment or reply).
    pub fn on_post_activity(&self, id: &str) {
        self.rearm(id, "post activity");
    }

    fn rearm(&self, id: &str, cause: &'static str) {
        match self.posts.on_activity(id, self.config.post_window) {
            Ok(deadline) => tracing::debug!(post = %id, deadline = %deadline, cause, "post armed"),
            Err(FadeError::ShuttingDown) => {
                tracing::debug!(post = %id, cause, "ignoring activity during shutdown")
            }
            Err(e) => tracing::warn!(post = %id, error = %e, cause, "failed to arm post"),
        }
    }

    /// Stop tracking a post that was deleted outright.
    pub fn on_post_deleted(&self, id: &str) -> bool {
        self.posts.cancel(id)
    }

    pub fn on_session_created(&self, session_id: &str, user_id: &str) -> DateTime<Utc> {
        self.sessions.insert(session_id, user_id)
    }

    /// Tie a post to a session so the post archives when the session expires.
    pub fn attach_session_post(&self, session_id: &str, post_id: &str) -> bool {
        self.sessions.attach_post(session_id, post_id)
    }

    /// Extend a session by a full lifetime. Returns false if the session is
    /// unknown or already expired; the caller should start a new one.
    pub fn on_session_touched(&self, session_id: &str) -> bool {
        self.sessions.refresh(session_id)
    }

    pub fn is_session_active(&self, session_id: &str) -> bool {
        self.sessions.is_active(session_id)
    }

    pub fn post_deadline(&self, id: &str) -> Option<DateTime<Utc>> {
        self.posts.deadline(id)
    }

    pub fn tracked_posts(&self) -> usize {
        self.posts.len()
    }

    /// Archive a post now, skipping the rest of its window.
    ///
    /// The archival runs as a tracked task, so `shutdown` waits for it even
    /// if the caller stops polling. Returns `None` once shutdown has begun.
    pub async fn force_expire(&self, id: &str) -> Option<ArchiveOutcome> {
        let trigger = self.posts.handler().clone();
        let owned = id.to_owned();
        let task = self
            .posts
            .expire_with(id, async move { trigger.archive(owned).await })?;

        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(post = %id, error = %e, "forced archival task failed");
                Some(ArchiveOutcome::Failed)
            }
        }
    }

    /// Re-arm every active post from its persisted last activity.
    ///
    /// Posts already tracked are left alone. A post whose window already
    /// passed is armed with a zero delay and archives right away. Returns the
    /// number of posts armed.
    pub async fn restore(&self) -> Result<usize> {
        let store = self.store.clone();
        let active = tokio::task::spawn_blocking(move || -> Result<Vec<(String, PostActivity)>> {
            let ids = store.active_post_ids()?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                match store.last_activity(&id) {
                    Ok(activity) => out.push((id, activity)),
                    // Deleted between the two queries.
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })
        .await??;

        let now = self.clock.now();
        let window = chrono::Duration::from_std(self.config.post_window)
            .map_err(|e| FadeError::Config {
                reason: e.to_string(),
            })?;

        let mut armed = 0;
        for (id, activity) in active {
            if self.posts.contains(&id) {
                continue;
            }
            let remaining = (activity.last_activity + window - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            self.posts.arm(&id, remaining)?;
            armed += 1;
        }

        tracing::info!(armed, "restored post timers");
        Ok(armed)
    }

    /// Stop accepting activity, cancel every pending timer and background
    /// loop, then wait up to `timeout` for in-flight archival to finish.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let timers_canceled = self.posts.shutdown();
        self.cancel.cancel();
        let drained = self.timers.drain(timeout).await;

        if drained {
            tracing::info!(timers_canceled, "lifecycle manager stopped");
        } else {
            tracing::warn!(
                timers_canceled,
                in_flight = self.timers.in_flight(),
                "lifecycle shutdown timed out with tasks still running"
            );
        }

        ShutdownReport {
            timers_canceled,
            drained,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        // Shutdown was never called: stop pending timers and both loops.
        if !self.posts.is_closed() {
            self.posts.shutdown();
        }
        self.cancel.cancel();
    }
}
