use log::warn;

use super::entity::{Record, Scope};
use super::error::SyncError;
use crate::backend::Backend;

/// Last known server state of one scope.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    scope: Option<Scope>,
    records: Vec<Record>,
    // Scope whose last load failed; `reload` retries it.
    failed_scope: Option<Scope>,
    load_error: Option<String>,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loaded {
    SameScope,
    ScopeChanged,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Fetches `scope` and replaces the snapshot. On failure the previous
    /// snapshot and scope stay as they were.
    pub fn load<B: Backend + ?Sized>(
        &mut self,
        scope: &Scope,
        backend: &B,
    ) -> Result<Loaded, SyncError> {
        match backend.fetch_collection(scope) {
            Ok(records) => {
                let outcome = if self.scope.as_ref() == Some(scope) {
                    Loaded::SameScope
                } else {
                    Loaded::ScopeChanged
                };
                self.scope = Some(scope.clone());
                self.failed_scope = None;
                self.load_error = None;
                self.apply_server_refresh(records);
                Ok(outcome)
            }
            Err(e) => {
                warn!("load of {} failed: {}", scope, e);
                self.failed_scope = Some(scope.clone());
                self.load_error = Some(e.to_string());
                Err(SyncError::Load(e))
            }
        }
    }

    /// Retries the scope of the last failed load, or refreshes the current one.
    pub fn reload<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<Loaded, SyncError> {
        let Some(scope) = self.failed_scope.clone().or_else(|| self.scope.clone()) else {
            return Err(SyncError::NotLoaded);
        };
        self.load(&scope, backend)
    }

    /// Drops one record locally, for when a refresh after a remote delete
    /// could not be fetched.
    pub fn forget(&mut self, id: &str) {
        self.records.retain(|r| r.id != id);
    }

    pub fn apply_server_refresh(&mut self, mut records: Vec<Record>) {
        records.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.records = records;
    }
}
