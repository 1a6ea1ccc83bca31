//! Catalog reads: the active board, the archive, and single archived posts.
//!
//! Archival is what moves a post from `list_active` to `list_archived`.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{FadeError, Result};

use super::models::{Comment, Post, PostSummary};
use super::{decode_ts, BoardStore};

const SUMMARY_COLUMNS: &str = "
    SELECT p.id, p.title, p.created_at, p.archived_at, COUNT(c.id)
    FROM posts p
    LEFT JOIN comments c ON c.post_id = p.id";

type SummaryRow = (String, String, String, Option<String>, i64);

impl BoardStore {
    /// Posts still open for comments, newest first.
    pub fn list_active(&self) -> Result<Vec<PostSummary>> {
        let conn = self.conn();
        let sql = format!(
            "{} WHERE p.archived_at IS NULL GROUP BY p.id ORDER BY p.created_at DESC",
            SUMMARY_COLUMNS
        );
        query_summaries(&conn, &sql)
    }

    /// Archived posts, most recently archived first.
    pub fn list_archived(&self) -> Result<Vec<PostSummary>> {
        let conn = self.conn();
        let sql = format!(
            "{} WHERE p.archived_at IS NOT NULL GROUP BY p.id ORDER BY p.archived_at DESC",
            SUMMARY_COLUMNS
        );
        query_summaries(&conn, &sql)
    }

    /// Load an archived post with its comments.
    ///
    /// An active or deleted post is `PostNotFound`: the archive only shows
    /// what has left the board.
    pub fn get_archived_post(&self, id: &str) -> Result<Post> {
        let conn = self.conn();
        let row: Option<(String, String, String, Option<String>, String, Option<String>)> = conn
            .query_row(
                "SELECT id, title, content, session_id, created_at, archived_at
                 FROM posts WHERE id = ?1 AND archived_at IS NOT NULL",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let (id, title, content, session_id, created_at, archived_at) =
            row.ok_or_else(|| FadeError::PostNotFound { id: id.to_string() })?;
        let comments = query_comments(&conn, &id)?;

        Ok(Post {
            id,
            title,
            content,
            session_id,
            created_at: decode_ts(&created_at)?,
            archived_at: archived_at.as_deref().map(decode_ts).transpose()?,
            comments,
        })
    }

    /// Comments on a post, oldest first. Empty for unknown posts.
    pub fn comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>> {
        let conn = self.conn();
        query_comments(&conn, post_id)
    }
}

fn query_summaries(conn: &Connection, sql: &str) -> Result<Vec<PostSummary>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| -> rusqlite::Result<SummaryRow> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, title, created_at, archived_at, comments)| {
            Ok(PostSummary {
                id,
                title,
                created_at: decode_ts(&created_at)?,
                archived_at: archived_at.as_deref().map(decode_ts).transpose()?,
                comment_count: comments as usize,
            })
        })
        .collect()
}

fn query_comments(conn: &Connection, post_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, post_id, parent_id, content, created_at
         FROM comments WHERE post_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![post_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, post_id, parent_id, content, created_at)| {
            Ok(Comment {
                id,
                post_id,
                parent_id,
                content,
                created_at: decode_ts(&created_at)?,
            })
        })
        .collect()
}
