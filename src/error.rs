//! Error types: persistence, lifecycle state, configuration, and task plumbing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FadeError {
    #[error("post not found: {id}")]
    PostNotFound { id: String },

    #[error("post is archived: {id}")]
    PostArchived { id: String },

    #[error("lifecycle manager is shutting down")]
    ShuttingDown,

    #[error("no tokio runtime available: {reason}")]
    Runtime { reason: String },

    #[error("background task failed: {reason}")]
    Task { reason: String },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FadeError {
    /// Not-found races are benign for the lifecycle manager: the entity was
    /// deleted or archived by a concurrent path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FadeError::PostNotFound { .. })
    }
}

impl From<tokio::task::JoinError> for FadeError {
    fn from(e: tokio::task::JoinError) -> Self {
        FadeError::Task {
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FadeError>;
