use log::debug;
use serde_json::json;
use std::collections::HashMap;

use super::entity::{Fields, Record, Scope};
use super::tracker::PendingTracker;
use super::view::{reconcile, ViewEntry};
use crate::backend::{Backend, BackendError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    Idle,
    Committing,
    Failed(String),
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Idle => "idle",
            CommitState::Committing => "committing",
            CommitState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// `(temp id, server id)` per created draft, in creation order.
    pub created: Vec<(String, String)>,
    pub updated: usize,
    pub reordered: usize,
}

/// Replays `pending` against the backend: creations, then updates, then
/// order-index fixes. Stops at the first failing call. Never touches
/// `pending`; clearing it is the caller's job once this returns `Ok`.
pub fn replay<B: Backend + ?Sized>(
    scope: &Scope,
    base: &[Record],
    pending: &PendingTracker,
    backend: &B,
) -> Result<CommitReport, BackendError> {
    let mut report = CommitReport::default();
    let mut current_index: HashMap<String, i64> = base
        .iter()
        .map(|r| (r.id.clone(), r.order_index))
        .collect();
    let mut resolved: HashMap<&str, String> = HashMap::new();

    let base_count = base.len() as i64;
    for (i, draft) in pending.creations().iter().enumerate() {
        let mut fields = draft.fields.clone();
        fields.insert("orderIndex".into(), json!(base_count + i as i64));
        let created = backend.create_entity(scope, &draft.temp_id, &fields)?;
        debug!("created {} as {}", draft.temp_id, created.id);
        current_index.insert(created.id.clone(), created.order_index);
        resolved.insert(draft.temp_id.as_str(), created.id.clone());
        report.created.push((draft.temp_id.clone(), created.id));
    }

    for update in pending.updates() {
        backend.update_entity(scope, &update.entity_id, &update.fields)?;
        report.updated += 1;
    }

    if pending.order().is_some() {
        for entry in reconcile(base, pending) {
            let target = entry.order_index();
            let id = match &entry {
                ViewEntry::Persisted { id, .. } => id.clone(),
                ViewEntry::Draft { temp_id, .. } => match resolved.get(temp_id.as_str()) {
                    Some(id) => id.clone(),
                    None => continue,
                },
            };
            if current_index.get(&id) == Some(&target) {
                continue;
            }
            let mut patch = Fields::new();
            patch.insert("orderIndex".into(), json!(target));
            backend.update_entity(scope, &id, &patch)?;
            report.reordered += 1;
        }
    }

    Ok(report)
}
