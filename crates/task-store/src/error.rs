//! Error type for the persistence layer.

use uuid::Uuid;

/// Errors raised by [`crate::TaskStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("build {0} already exists with a different id")]
    DuplicateBuild(Uuid),
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error("build {0} not found")]
    BuildNotFound(Uuid),
}

impl TaskStoreError {
    /// Database errors from a dropped connection or deadlock are worth a
    /// caller-level retry; anything else (constraint violations, missing
    /// rows) reflects a logic error and should propagate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStoreError::Database(e) if e.as_database_error().is_none())
    }
}
