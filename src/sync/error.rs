use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{field} {message}")]
    Validation { field: String, message: String },
    #[error("unknown or removed entity: {0}")]
    StaleReference(String),
    #[error("session has not started yet: {0}")]
    NotEditable(String),
    #[error("a commit is already running")]
    CommitInProgress,
    #[error("no collection loaded")]
    NotLoaded,
    #[error("too many changes in one batch ({count} > {limit})")]
    BatchTooLarge { count: usize, limit: usize },
    #[error("load failed: {0}")]
    Load(#[source] BackendError),
    #[error("commit failed: {0}")]
    Commit(#[source] BackendError),
    #[error("delete failed: {0}")]
    Delete(#[source] BackendError),
    #[error("save failed: {0}")]
    Save(#[source] BackendError),
}

impl SyncError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Validation { .. } | SyncError::BatchTooLarge { .. } => "validation_failed",
            SyncError::StaleReference(_) => "stale_reference",
            SyncError::NotEditable(_) => "not_editable",
            SyncError::CommitInProgress => "commit_in_progress",
            SyncError::NotLoaded => "not_loaded",
            SyncError::Load(_) => "load_failed",
            SyncError::Commit(_) => "commit_failed",
            SyncError::Delete(_) => "delete_failed",
            SyncError::Save(_) => "save_failed",
        }
    }

    /// Failures that leave local state intact and can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Load(_) | SyncError::Commit(_) | SyncError::Delete(_) | SyncError::Save(_)
        )
    }

    pub fn backend_cause(&self) -> Option<&BackendError> {
        match self {
            SyncError::Load(e) | SyncError::Commit(e) | SyncError::Delete(e) | SyncError::Save(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}
