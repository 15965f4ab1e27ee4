mod sqlite;

pub use sqlite::SqliteBackend;

use crate::sync::entity::{Fields, Record, Scope};
use crate::sync::matrix::{AttendanceSnapshot, AttendanceUpdate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    /// The caller's view of the data no longer matches the stored one.
    #[error("stale: {0}")]
    Stale(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::NotFound(_) => "not_found",
            BackendError::Rejected(_) => "rejected",
            BackendError::Stale(_) => "stale",
            BackendError::Storage(_) => "storage_failed",
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Storage(e.to_string())
    }
}

/// Authoritative side of every editing session.
///
/// Calls are synchronous; the editing core issues them one at a time and in
/// a fixed order, so implementations never see interleaved commits.
pub trait Backend {
    fn fetch_collection(&self, scope: &Scope) -> Result<Vec<Record>, BackendError>;

    /// `client_ref` is the draft's temporary id. Creating twice with the same
    /// reference in the same scope must return the first entity.
    fn create_entity(
        &self,
        scope: &Scope,
        client_ref: &str,
        fields: &Fields,
    ) -> Result<Record, BackendError>;

    fn update_entity(&self, scope: &Scope, id: &str, patch: &Fields)
        -> Result<Record, BackendError>;

    fn delete_entity(&self, scope: &Scope, id: &str) -> Result<(), BackendError>;

    fn fetch_attendance(&self, group_id: &str) -> Result<AttendanceSnapshot, BackendError>;

    fn bulk_update_attendance(
        &self,
        group_id: &str,
        updates: &[AttendanceUpdate],
    ) -> Result<(), BackendError>;
}
