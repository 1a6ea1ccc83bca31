//! Retention reaper: periodic hard deletion of old posts.
//!
//! Works purely from persisted timestamps and holds no in-memory state, so
//! it needs no coordination with the expiry registry. A post deleted here
//! whose timer later fires hits the benign not-found path in archival.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::lifecycle::clock::{chrono_span, Clock};
use crate::lifecycle::metrics::LifecycleMetrics;
use crate::store::LifecycleStore;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Posts deleted by one reaper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Posts with no comments, deleted by creation age.
    pub uncommented: usize,
    /// Posts deleted by the age of their latest comment.
    pub commented: usize,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.uncommented + self.commented
    }
}

pub struct RetentionReaper {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LifecycleMetrics>,
    policy: RetentionPolicy,
}

impl RetentionReaper {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<LifecycleMetrics>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            policy,
        }
    }

    /// Cutoffs for the two deletion rules at `now`.
    fn cutoffs(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - chrono_span(self.policy.uncommented),
            now - chrono_span(self.policy.commented),
        )
    }

    /// Run both deletion rules once.
    ///
    /// Each rule commits on its own; if the second fails the first stays
    /// applied and the error is returned.
    pub async fn reap_once(&self) -> Result<ReapReport> {
        let (uncommented_cutoff, commented_cutoff) = self.cutoffs(self.clock.now());
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<ReapReport> {
            let uncommented = store.delete_stale_uncommented(uncommented_cutoff)?;
            let commented = store.delete_stale_commented(commented_cutoff)?;
            Ok(ReapReport {
                uncommented,
                commented,
            })
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                LifecycleMetrics::add(&self.metrics.posts_reaped, report.total() as u64);
                Ok(report)
            }
            Ok(Err(e)) => {
                LifecycleMetrics::incr(&self.metrics.reap_failures);
                Err(e)
            }
            Err(e) => {
                LifecycleMetrics::incr(&self.metrics.reap_failures);
                Err(e.into())
            }
        }
    }

    /// Reap on a fixed interval until `cancel` fires. Failures are logged and
    /// retried on the next tick.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            uncommented_secs = self.policy.uncommented.as_secs(),
            commented_secs = self.policy.commented.as_secs(),
            "retention reaper started"
        );

        let mut ticker = tokio::time::interval(interval.max(MIN_REAP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; wait a full interval first.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reap_once().await {
                Ok(report) => {
                    if report.total() > 0 {
                        tracing::info!(
                            uncommented = report.uncommented,
                            commented = report.commented,
                            "retention pass complete"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "retention pass failed"),
            }
        }

        tracing::info!("retention reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::clock::ManualClock;
    use crate::store::{BoardStore, NewComment, NewPost};

    const DAY: Duration = Duration::from_secs(86_400);

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            uncommented: DAY,
            commented: DAY * 7,
        }
    }

    fn post(store: &BoardStore, id: &str, at: DateTime<Utc>) {
        store
            .create_post(&NewPost {
                id: id.into(),
                title: "t".into(),
                content: "c".into(),
                session_id: None,
                created_at: at,
            })
            .unwrap();
    }

    fn comment(store: &BoardStore, id: &str, post_id: &str, at: DateTime<Utc>) {
        store
            .add_comment(&NewComment {
                id: id.into(),
                post_id: post_id.into(),
                parent_id: None,
                content: "c".into(),
                created_at: at,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn reaps_by_both_rules() {
        let store = BoardStore::open_memory().unwrap();
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let metrics = Arc::new(LifecycleMetrics::default());

        post(&store, "quiet", start);
        post(&store, "busy", start);
        comment(&store, "c1", "busy", start + chrono::Duration::days(2));

        let reaper = RetentionReaper::new(
            Arc::new(store.clone()),
            clock.clone(),
            metrics.clone(),
            policy(),
        );

        // Half a day in: nothing is old enough.
        clock.advance(DAY / 2);
        assert_eq!(reaper.reap_once().await.unwrap(), ReapReport::default());

        // Two days in: the uncommented post is past its threshold.
        clock.advance(DAY * 3 / 2);
        let report = reaper.reap_once().await.unwrap();
        assert_eq!(report.uncommented, 1);
        assert_eq!(report.commented, 0);
        assert!(store.post_state("quiet").unwrap().is_none());

        // Seven days after the comment, the commented post goes too.
        clock.set(start + chrono::Duration::days(9) + chrono::Duration::seconds(1));
        let report = reaper.reap_once().await.unwrap();
        assert_eq!(report.commented, 1);
        assert!(store.post_state("busy").unwrap().is_none());
        assert_eq!(metrics.snapshot().posts_reaped, 2);
    }

    #[tokio::test]
    async fn nothing_to_reap_is_zero() {
        let store = BoardStore::open_memory().unwrap();
        let reaper = RetentionReaper::new(
            Arc::new(store),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(LifecycleMetrics::default()),
            policy(),
        );
        assert_eq!(reaper.reap_once().await.unwrap().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let store = BoardStore::open_memory().unwrap();
        let reaper = Arc::new(RetentionReaper::new(
            Arc::new(store),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(LifecycleMetrics::default()),
            policy(),
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reaper.run(Duration::from_secs(60), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
