//! Post and comment storage: board writes plus the lookups the lifecycle
//! manager needs (archive flag, last activity, active ids).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::error::{FadeError, Result};

use super::models::{NewComment, NewPost, PostActivity, PostState};
use super::{decode_ts, encode_ts, BoardStore};

impl BoardStore {
    // ---- Board writes ----

    pub fn create_post(&self, post: &NewPost) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO posts (id, title, content, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                post.id,
                post.title,
                post.content,
                post.session_id,
                encode_ts(&post.created_at),
            ],
        )?;
        Ok(())
    }

    /// Insert a comment on an active post.
    ///
    /// Fails with `PostNotFound` if the post was deleted (possibly by a
    /// concurrent reaper pass) and `PostArchived` if it is read-only.
    pub fn add_comment(&self, comment: &NewComment) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let archived_at: Option<Option<String>> = tx
            .query_row(
                "SELECT archived_at FROM posts WHERE id = ?1",
                params![comment.post_id],
                |row| row.get(0),
            )
            .optional()?;

        match archived_at {
            None => {
                return Err(FadeError::PostNotFound {
                    id: comment.post_id.clone(),
                })
            }
            Some(Some(_)) => {
                return Err(FadeError::PostArchived {
                    id: comment.post_id.clone(),
                })
            }
            Some(None) => {}
        }

        tx.execute(
            "INSERT INTO comments (id, post_id, parent_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id,
                comment.post_id,
                comment.parent_id,
                comment.content,
                encode_ts(&comment.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a post and its comments. Returns false if it did not exist.
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ---- Lifecycle lookups ----

    /// Current state of a post, or None once it has been deleted.
    pub fn post_state(&self, id: &str) -> Result<Option<PostState>> {
        let conn = self.conn();
        let archived_at: Option<Option<String>> = conn
            .query_row(
                "SELECT archived_at FROM posts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(archived_at.map(|a| match a {
            Some(_) => PostState::Archived,
            None => PostState::Active,
        }))
    }

    pub fn comment_count(&self, post_id: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub(super) fn archive_post(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE posts SET archived_at = ?2 WHERE id = ?1 AND archived_at IS NULL",
            params![id, encode_ts(&at)],
        )?;
        if updated > 0 {
            return Ok(true);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(false)
        } else {
            Err(FadeError::PostNotFound { id: id.to_string() })
        }
    }

    pub(super) fn post_activity(&self, id: &str) -> Result<PostActivity> {
        let conn = self.conn();
        let row: Option<(String, Option<String>, i64)> = conn
            .query_row(
                "SELECT p.created_at, MAX(c.created_at), COUNT(c.id)
                 FROM posts p
                 LEFT JOIN comments c ON c.post_id = p.id
                 WHERE p.id = ?1
                 GROUP BY p.id",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (created_at, last_comment, comments) =
            row.ok_or_else(|| FadeError::PostNotFound { id: id.to_string() })?;

        let created_at = decode_ts(&created_at)?;
        let last_activity = match last_comment {
            Some(raw) => decode_ts(&raw)?.max(created_at),
            None => created_at,
        };

        Ok(PostActivity {
            last_activity,
            has_comments: comments > 0,
        })
    }

    pub(super) fn list_active_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id FROM posts WHERE archived_at IS NULL ORDER BY created_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LifecycleStore;

    fn post(id: &str, created_at: DateTime<Utc>) -> NewPost {
        NewPost {
            id: id.to_string(),
            title: format!("title {}", id),
            content: "body".to_string(),
            session_id: None,
            created_at,
        }
    }

    fn comment(id: &str, post_id: &str, created_at: DateTime<Utc>) -> NewComment {
        NewComment {
            id: id.to_string(),
            post_id: post_id.to_string(),
            parent_id: None,
            content: "reply".to_string(),
            created_at,
        }
    }

    #[test]
    fn mark_archived_is_idempotent() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        store.create_post(&post("p1", now)).unwrap();

        assert!(store.mark_archived("p1", now).unwrap());
        assert!(!store.mark_archived("p1", now).unwrap());
        assert_eq!(store.post_state("p1").unwrap(), Some(PostState::Archived));
    }

    #[test]
    fn mark_archived_missing_post() {
        let store = BoardStore::open_memory().unwrap();
        let err = store.mark_archived("ghost", Utc::now()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn last_activity_tracks_newest_comment() {
        let store = BoardStore::open_memory().unwrap();
        let t0 = Utc::now() - chrono::Duration::hours(1);
        store.create_post(&post("p1", t0)).unwrap();

        let activity = store.last_activity("p1").unwrap();
        assert_eq!(activity.last_activity, encode_round(t0));
        assert!(!activity.has_comments);

        let tc = t0 + chrono::Duration::minutes(9);
        store.add_comment(&comment("c1", "p1", t0 + chrono::Duration::minutes(2))).unwrap();
        store.add_comment(&comment("c2", "p1", tc)).unwrap();

        let activity = store.last_activity("p1").unwrap();
        assert_eq!(activity.last_activity, encode_round(tc));
        assert!(activity.has_comments);
        assert_eq!(store.comment_count("p1").unwrap(), 2);
    }

    #[test]
    fn comment_on_deleted_post_fails_cleanly() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        store.create_post(&post("p1", now)).unwrap();
        store.add_comment(&comment("c1", "p1", now)).unwrap();
        assert!(store.delete_post("p1").unwrap());

        let err = store.add_comment(&comment("c2", "p1", now)).unwrap_err();
        assert!(err.is_not_found());
        // Cascade removed the first comment with its post.
        assert_eq!(store.comment_count("p1").unwrap(), 0);
    }

    #[test]
    fn comment_on_archived_post_rejected() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        store.create_post(&post("p1", now)).unwrap();
        store.mark_archived("p1", now).unwrap();

        let err = store.add_comment(&comment("c1", "p1", now)).unwrap_err();
        assert!(matches!(err, FadeError::PostArchived { .. }));
    }

    #[test]
    fn active_ids_exclude_archived() {
        let store = BoardStore::open_memory().unwrap();
        let now = Utc::now();
        store.create_post(&post("a", now)).unwrap();
        store.create_post(&post("b", now + chrono::Duration::seconds(1))).unwrap();
        store.mark_archived("a", now).unwrap();

        assert_eq!(store.active_post_ids().unwrap(), vec!["b".to_string()]);
    }

    fn encode_round(ts: DateTime<Utc>) -> DateTime<Utc> {
        decode_ts(&encode_ts(&ts)).unwrap()
    }
}
