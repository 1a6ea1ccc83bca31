//! Archival trigger: marks a post archived once its window elapses.
//!
//! Called with the registry entry already removed. Not-found and
//! already-archived are benign; other persistence errors are logged and
//! counted but not retried here. The retention reaper's timestamp sweep is
//! the backstop for posts that fail to archive.

use std::sync::Arc;

use crate::lifecycle::clock::Clock;
use crate::lifecycle::metrics::LifecycleMetrics;
use crate::lifecycle::registry::ExpiryHandler;
use crate::store::LifecycleStore;

/// Result of one archival attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// This call moved the post from active to archived.
    Archived,
    /// The post was already archived or no longer exists.
    AlreadyGone,
    /// Persistence failed; the post stays active until the reaper catches it.
    Failed,
}

#[derive(Clone)]
pub struct ArchivalTrigger {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LifecycleMetrics>,
}

impl ArchivalTrigger {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// Mark `id` archived at the current time. Safe to call repeatedly.
    pub async fn archive(&self, id: String) -> ArchiveOutcome {
        let store = self.store.clone();
        let at = self.clock.now();
        let post = id.clone();
        let result = tokio::task::spawn_blocking(move || store.mark_archived(&post, at)).await;

        match result {
            Ok(Ok(true)) => {
                LifecycleMetrics::incr(&self.metrics.posts_archived);
                tracing::info!(post = %id, "post archived");
                ArchiveOutcome::Archived
            }
            Ok(Ok(false)) => {
                LifecycleMetrics::incr(&self.metrics.archive_noops);
                tracing::debug!(post = %id, "post already archived");
                ArchiveOutcome::AlreadyGone
            }
            Ok(Err(e)) if e.is_not_found() => {
                LifecycleMetrics::incr(&self.metrics.archive_noops);
                tracing::debug!(post = %id, "post gone before archival");
                ArchiveOutcome::AlreadyGone
            }
            Ok(Err(e)) => {
                LifecycleMetrics::incr(&self.metrics.archive_failures);
                tracing::warn!(post = %id, error = %e, "failed to archive post");
                ArchiveOutcome::Failed
            }
            Err(e) => {
                LifecycleMetrics::incr(&self.metrics.archive_failures);
                tracing::warn!(post = %id, error = %e, "archival task panicked");
                ArchiveOutcome::Failed
            }
        }
    }
}

impl ExpiryHandler for ArchivalTrigger {
    async fn on_expired(&self, id: String) {
        self.archive(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FadeError;
    use crate::lifecycle::clock::ManualClock;
    use crate::store::{BoardStore, NewPost, PostActivity, PostState};
    use chrono::{DateTime, Utc};

    fn trigger_for(store: Arc<dyn LifecycleStore>) -> (ArchivalTrigger, Arc<LifecycleMetrics>) {
        let metrics = Arc::new(LifecycleMetrics::default());
        let trigger = ArchivalTrigger::new(
            store,
            Arc::new(ManualClock::new(Utc::now())),
            metrics.clone(),
        );
        (trigger, metrics)
    }

    #[tokio::test]
    async fn archive_twice_is_one_state_change() {
        let store = BoardStore::open_memory().unwrap();
        store
            .create_post(&NewPost {
                id: "p1".into(),
                title: "t".into(),
                content: "c".into(),
                session_id: None,
                created_at: Utc::now(),
            })
            .unwrap();
        let (trigger, metrics) = trigger_for(Arc::new(store.clone()));

        assert_eq!(trigger.archive("p1".into()).await, ArchiveOutcome::Archived);
        assert_eq!(trigger.archive("p1".into()).await, ArchiveOutcome::AlreadyGone);
        assert_eq!(store.post_state("p1").unwrap(), Some(PostState::Archived));

        let snap = metrics.snapshot();
        assert_eq!(snap.posts_archived, 1);
        assert_eq!(snap.archive_noops, 1);
        assert_eq!(snap.archive_failures, 0);
    }

    #[tokio::test]
    async fn missing_post_is_benign() {
        let (trigger, metrics) = trigger_for(Arc::new(BoardStore::open_memory().unwrap()));
        assert_eq!(trigger.archive("ghost".into()).await, ArchiveOutcome::AlreadyGone);
        assert_eq!(metrics.snapshot().archive_failures, 0);
    }

    struct BrokenStore;

    impl LifecycleStore for BrokenStore {
        fn mark_archived(&self, _id: &str, _at: DateTime<Utc>) -> crate::error::Result<bool> {
            Err(FadeError::Io(std::io::Error::other("disk on fire")))
        }
        fn delete_stale_uncommented(&self, _cutoff: DateTime<Utc>) -> crate::error::Result<usize> {
            Ok(0)
        }
        fn delete_stale_commented(&self, _cutoff: DateTime<Utc>) -> crate::error::Result<usize> {
            Ok(0)
        }
        fn last_activity(&self, id: &str) -> crate::error::Result<PostActivity> {
            Err(FadeError::PostNotFound { id: id.to_string() })
        }
        fn active_post_ids(&self) -> crate::error::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_counted_not_raised() {
        let (trigger, metrics) = trigger_for(Arc::new(BrokenStore));
        assert_eq!(trigger.archive("p1".into()).await, ArchiveOutcome::Failed);
        assert_eq!(metrics.snapshot().archive_failures, 1);
    }
}
