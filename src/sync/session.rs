use log::{info, warn};
use serde_json::{json, Value as JsonValue};

use super::commit::{self, CommitReport, CommitState};
use super::entity::{EntityId, Fields, Scope};
use super::error::SyncError;
use super::store::{EntityStore, Loaded};
use super::tracker::{Deletion, PendingTracker};
use super::view::{reconcile, ViewEntry};
use crate::backend::Backend;
use crate::settings::BuilderSettings;

/// Local edits that never touch the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    SetField {
        id: EntityId,
        field: String,
        value: JsonValue,
    },
    AddDraft {
        fields: Fields,
    },
    Reorder {
        ids: Vec<EntityId>,
    },
}

/// Course-builder editing state for one scope.
#[derive(Debug, Clone)]
pub struct EditSession {
    store: EntityStore,
    pending: PendingTracker,
    commit_state: CommitState,
    settings: BuilderSettings,
}

impl EditSession {
    pub fn new(settings: BuilderSettings) -> Self {
        Self {
            store: EntityStore::new(),
            pending: PendingTracker::new(),
            commit_state: CommitState::Idle,
            settings,
        }
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.store.scope()
    }

    pub fn pending(&self) -> &PendingTracker {
        &self.pending
    }

    pub fn commit_state(&self) -> &CommitState {
        &self.commit_state
    }

    pub fn load_error(&self) -> Option<&str> {
        self.store.load_error()
    }

    pub fn unsaved_changes(&self) -> usize {
        self.pending.unsaved_changes()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// New limits apply to later edits; already-buffered values are kept.
    pub fn set_settings(&mut self, settings: BuilderSettings) {
        self.settings = settings;
    }

    /// Loads `scope`. Pending work of a previous scope is dropped only once
    /// the new scope has actually loaded.
    pub fn load<B: Backend + ?Sized>(&mut self, scope: &Scope, backend: &B) -> Result<(), SyncError> {
        if self.store.load(scope, backend)? == Loaded::ScopeChanged && !self.pending.is_empty() {
            info!(
                "dropping {} unsaved changes on switch to {}",
                self.pending.unsaved_changes(),
                scope
            );
            self.pending = PendingTracker::new();
        }
        self.settle_pending();
        Ok(())
    }

    pub fn reload<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<(), SyncError> {
        if self.store.reload(backend)? == Loaded::ScopeChanged {
            self.pending = PendingTracker::new();
        }
        self.settle_pending();
        Ok(())
    }

    /// Lines pending work up with a fresh snapshot: drafts an earlier,
    /// partly failed commit already created are adopted, and edits of
    /// entities missing from the snapshot are dropped.
    fn settle_pending(&mut self) {
        let adopted: Vec<(String, usize)> = self
            .pending
            .creations()
            .iter()
            .filter_map(|d| {
                self.store
                    .records()
                    .iter()
                    .position(|r| r.client_ref.as_deref() == Some(d.temp_id.as_str()))
                    .map(|idx| (d.temp_id.clone(), idx))
            })
            .collect();
        for (temp_id, idx) in adopted {
            if let Some(record) = self.store.records().get(idx) {
                info!("draft {} already exists as {}", temp_id, record.id);
                self.pending.adopt_created(&temp_id, record);
            }
        }

        let gone: Vec<String> = self
            .pending
            .updates()
            .iter()
            .filter(|u| self.store.get(&u.entity_id).is_none())
            .map(|u| u.entity_id.clone())
            .collect();
        for entity_id in gone {
            warn!("dropping pending edits for {}: no longer on the server", entity_id);
            self.pending.forget_entity(&entity_id);
        }
    }

    /// Applies one local edit. Returns the temporary id for `AddDraft`.
    pub fn apply(&mut self, edit: Edit) -> Result<Option<String>, SyncError> {
        let kind = self.store.scope().ok_or(SyncError::NotLoaded)?.kind();
        match edit {
            Edit::SetField { id, field, value } => {
                let value = kind.validate_field(&field, &value, &self.settings)?;
                self.pending
                    .record_field_edit(&id, &field, value, self.store.records())?;
                Ok(None)
            }
            Edit::AddDraft { fields } => {
                let fields = kind.validate_draft(&fields, &self.settings)?;
                Ok(Some(self.pending.record_creation(fields)))
            }
            Edit::Reorder { ids } => {
                self.pending.set_order(ids);
                Ok(None)
            }
        }
    }

    /// Drafts are forgotten locally; server entities are deleted right away
    /// and the snapshot is reloaded.
    pub fn delete<B: Backend + ?Sized>(
        &mut self,
        id: &EntityId,
        backend: &B,
    ) -> Result<Deletion, SyncError> {
        let scope = self.store.scope().cloned().ok_or(SyncError::NotLoaded)?;
        let outcome = self.pending.record_deletion(id)?;
        if let Deletion::Remote(entity_id) = &outcome {
            if self.store.get(entity_id).is_none() {
                return Err(SyncError::StaleReference(entity_id.clone()));
            }
            backend
                .delete_entity(&scope, entity_id)
                .map_err(SyncError::Delete)?;
            info!("deleted {} from {}", entity_id, scope);
            self.pending.forget_entity(entity_id);
            match self.store.load(&scope, backend) {
                Ok(_) => self.settle_pending(),
                Err(e) => {
                    // Snapshot is stale now; at least stop showing the deleted row.
                    warn!("delete succeeded but refresh failed: {}", e);
                    self.store.forget(entity_id);
                }
            }
        }
        Ok(outcome)
    }

    /// Replays everything pending. Pending state is cleared only when every
    /// call succeeded; on failure it is left exactly as it was.
    pub fn commit<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<CommitReport, SyncError> {
        if self.commit_state == CommitState::Committing {
            return Err(SyncError::CommitInProgress);
        }
        let scope = self.store.scope().cloned().ok_or(SyncError::NotLoaded)?;
        self.commit_state = CommitState::Committing;
        info!(
            "committing {} creations, {} updates{} to {}",
            self.pending.creations().len(),
            self.pending.updates().len(),
            if self.pending.order().is_some() { " and a reorder" } else { "" },
            scope
        );

        match commit::replay(&scope, self.store.records(), &self.pending, backend) {
            Ok(report) => {
                self.pending.clear_all();
                self.commit_state = CommitState::Idle;
                if let Err(e) = self.store.load(&scope, backend) {
                    warn!("commit succeeded but refresh failed: {}", e);
                }
                info!(
                    "commit finished: {} created, {} updated, {} reordered",
                    report.created.len(),
                    report.updated,
                    report.reordered
                );
                Ok(report)
            }
            Err(e) => {
                warn!("commit to {} failed: {}", scope, e);
                self.commit_state = CommitState::Failed(e.to_string());
                Err(SyncError::Commit(e))
            }
        }
    }

    pub fn view(&self) -> Vec<ViewEntry> {
        reconcile(self.store.records(), &self.pending)
    }

    pub fn to_json(&self) -> JsonValue {
        let entries: Vec<JsonValue> = self.view().iter().map(|e| e.to_json()).collect();
        let commit_error = match &self.commit_state {
            CommitState::Failed(message) => json!(message),
            _ => JsonValue::Null,
        };
        json!({
            "scope": self.store.scope().map(|s| s.to_json()),
            "entries": entries,
            "unsavedChanges": self.unsaved_changes(),
            "commitState": self.commit_state.as_str(),
            "commitError": commit_error,
            "loadError": self.store.load_error().map(|m| json!({ "message": m, "retryable": true })),
        })
    }
}
