use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lifecycle state of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostState {
    Active,
    Archived,
}

/// Most recent activity on a post, used to rebuild timers on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostActivity {
    /// Creation time, or the newest comment's time if there are comments.
    pub last_activity: DateTime<Utc>,
    pub has_comments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Session that created the post, if any.
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub id: String,
    pub post_id: String,
    /// Comment this one replies to; None for a top-level comment.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Catalog row: a post without its body or comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Set once the post has left the active catalog.
    pub archived_at: Option<DateTime<Utc>>,
    pub comment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A full post with its comments, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn state(&self) -> PostState {
        match self.archived_at {
            Some(_) => PostState::Archived,
            None => PostState::Active,
        }
    }
}
