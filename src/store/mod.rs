//! SQLite storage: posts, comments, archival flags, and retention deletes.
//!
//! All access is synchronous (rusqlite). Async callers use `spawn_blocking`.
//!
//! Timestamps are stored as RFC 3339 UTC strings with fixed microsecond
//! precision, so string comparison in SQL matches chronological order.
//! Foreign keys are enforced: a comment can never reference a deleted post.

pub mod models;
mod catalog;
mod posts;
mod retention;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{FadeError, Result};

pub use models::{Comment, NewComment, NewPost, Post, PostActivity, PostState, PostSummary};

/// Persistence operations the lifecycle manager depends on.
///
/// Implementations must be safe to call from several threads at once; the
/// manager never holds its own locks while calling in.
pub trait LifecycleStore: Send + Sync + 'static {
    /// Mark an active post archived at `at`.
    ///
    /// Returns `Ok(true)` if this call archived the post, `Ok(false)` if it was
    /// already archived, and `PostNotFound` if no such post exists.
    fn mark_archived(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Delete posts without comments created before `cutoff`.
    fn delete_stale_uncommented(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Delete posts whose most recent comment is older than `cutoff`.
    fn delete_stale_commented(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Last activity timestamp for a post.
    fn last_activity(&self, id: &str) -> Result<PostActivity>;

    /// Ids of every post that is not archived.
    fn active_post_ids(&self) -> Result<Vec<String>>;
}

const SCHEMA_DDL: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        session_id TEXT,
        created_at TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created_at);
    CREATE INDEX IF NOT EXISTS idx_posts_archived ON posts(archived_at);
    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        post_id TEXT NOT NULL,
        parent_id TEXT,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at);
";

/// Thread-safe wrapper around a SQLite connection.
/// All access is synchronous; use tokio::task::spawn_blocking from async code.
#[derive(Clone)]
pub struct BoardStore {
    conn: Arc<Mutex<Connection>>,
}

impl BoardStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Acquire the database connection, recovering from mutex poisoning.
    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_DDL)?;
        Ok(())
    }
}

/// Canonical timestamp encoding used in every column.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            FadeError::Database(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))
        })
}

impl LifecycleStore for BoardStore {
    fn mark_archived(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.archive_post(id, at)
    }

    fn delete_stale_uncommented(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.delete_uncommented_before(&cutoff)
    }

    fn delete_stale_commented(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.delete_commented_before(&cutoff)
    }

    fn last_activity(&self, id: &str) -> Result<PostActivity> {
        self.post_activity(id)
    }

    fn active_post_ids(&self) -> Result<Vec<String>> {
        self.list_active_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding_orders_lexically() {
        let base = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = base + chrono::Duration::milliseconds(1);
        assert!(encode_ts(&base) < encode_ts(&later));
        assert_eq!(decode_ts(&encode_ts(&later)).unwrap(), later);
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.db");
        let store = BoardStore::open(&path).unwrap();
        assert!(store.active_post_ids().unwrap().is_empty());
        // Reopening an existing database keeps the schema.
        drop(store);
        assert!(BoardStore::open(&path).is_ok());
    }
}
