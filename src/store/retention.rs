//! Timestamp-based retention deletes.
//!
//! These run independently of the in-memory registry and reclaim storage even
//! when timer state was lost. Two separate windows apply:
//! - commentless posts age from their creation time
//! - commented posts age from their most recent comment

use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};

use crate::error::Result;

use super::{encode_ts, BoardStore};

impl BoardStore {
    /// Delete posts without comments created before `cutoff`.
    pub(super) fn delete_uncommented_before(&self, cutoff: &DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM posts
             WHERE created_at < ?1
             AND NOT EXISTS (SELECT 1 FROM comments c WHERE c.post_id = posts.id)",
            params![encode_ts(cutoff)],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Delete posts whose newest comment is older than `cutoff`.
    /// Comments go with them via ON DELETE CASCADE.
    pub(super) fn delete_commented_before(&self, cutoff: &DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM posts
             WHERE id IN (
                 SELECT post_id FROM comments
                 GROUP BY post_id
                 HAVING MAX(created_at) < ?1
             )",
            params![encode_ts(cutoff)],
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LifecycleStore, NewComment, NewPost};
    use chrono::Duration;

    fn insert_post(store: &BoardStore, id: &str, created_at: DateTime<Utc>) {
        store
            .create_post(&NewPost {
                id: id.to_string(),
                title: "t".to_string(),
                content: "c".to_string(),
                session_id: None,
                created_at,
            })
            .unwrap();
    }

    fn insert_comment(store: &BoardStore, id: &str, post_id: &str, created_at: DateTime<Utc>) {
        store
            .add_comment(&NewComment {
                id: id.to_string(),
                post_id: post_id.to_string(),
                parent_id: None,
                content: "c".to_string(),
                created_at,
            })
            .unwrap();
    }

    #[test]
    fn uncommented_respects_cutoff() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        insert_post(&store, "old", now - Duration::hours(25));
        insert_post(&store, "young", now - Duration::hours(23));
        insert_post(&store, "old_discussed", now - Duration::hours(30));
        insert_comment(&store, "c1", "old_discussed", now - Duration::hours(1));

        let deleted = store.delete_stale_uncommented(now - Duration::hours(24)).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.post_state("old").unwrap().is_none());
        assert!(store.post_state("young").unwrap().is_some());
        assert!(store.post_state("old_discussed").unwrap().is_some());
    }

    #[test]
    fn commented_uses_latest_comment() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        insert_post(&store, "stale", now - Duration::days(30));
        insert_comment(&store, "s1", "stale", now - Duration::days(9));
        insert_comment(&store, "s2", "stale", now - Duration::days(8));

        insert_post(&store, "lively", now - Duration::days(30));
        insert_comment(&store, "l1", "lively", now - Duration::days(20));
        insert_comment(&store, "l2", "lively", now - Duration::days(1));

        insert_post(&store, "silent", now - Duration::days(30));

        let deleted = store.delete_stale_commented(now - Duration::days(7)).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.post_state("stale").unwrap().is_none());
        assert_eq!(store.comment_count("stale").unwrap(), 0);
        assert!(store.post_state("lively").unwrap().is_some());
        // Commentless posts are left to the other sweep.
        assert!(store.post_state("silent").unwrap().is_some());
    }

    #[test]
    fn archived_posts_are_reaped_too() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        insert_post(&store, "p", now - Duration::hours(48));
        store.mark_archived("p", now - Duration::hours(47)).unwrap();

        assert_eq!(store.delete_stale_uncommented(now - Duration::hours(24)).unwrap(), 1);
        assert!(store.post_state("p").unwrap().is_none());
    }
}
