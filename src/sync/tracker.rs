use serde_json::Value as JsonValue;

use super::entity::{EntityId, Fields, Record};
use super::error::SyncError;

/// Buffered field changes for one entity the server already knows.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub entity_id: String,
    pub fields: Fields,
    pub base_order_index: i64,
}

/// An entity that exists only locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub temp_id: String,
    pub fields: Fields,
}

/// What a deletion request turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    /// A draft was dropped; the server never knew about it.
    Forgotten,
    /// A server entity; the caller must delete it remotely right away.
    Remote(String),
}

/// Minimal diff between the server snapshot and what the user sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingTracker {
    updates: Vec<PendingUpdate>,
    creations: Vec<Draft>,
    order: Option<Vec<EntityId>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> &[PendingUpdate] {
        &self.updates
    }

    pub fn creations(&self) -> &[Draft] {
        &self.creations
    }

    pub fn order(&self) -> Option<&[EntityId]> {
        self.order.as_deref()
    }

    pub fn update_for(&self, entity_id: &str) -> Option<&PendingUpdate> {
        self.updates.iter().find(|u| u.entity_id == entity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.creations.is_empty() && self.order.is_none()
    }

    /// Count shown as "N unsaved changes". A reordering counts once.
    pub fn unsaved_changes(&self) -> usize {
        self.updates.len() + self.creations.len() + usize::from(self.order.is_some())
    }

    /// Drafts are edited in place; server entities get (or extend) their
    /// single pending-update record. Same-field edits overwrite.
    pub fn record_field_edit(
        &mut self,
        id: &EntityId,
        field: &str,
        value: JsonValue,
        base: &[Record],
    ) -> Result<(), SyncError> {
        match id {
            EntityId::Temp(temp_id) => {
                let draft = self
                    .creations
                    .iter_mut()
                    .find(|d| &d.temp_id == temp_id)
                    .ok_or_else(|| SyncError::StaleReference(temp_id.clone()))?;
                draft.fields.insert(field.to_string(), value);
            }
            EntityId::Persisted(entity_id) => {
                let record = base
                    .iter()
                    .find(|r| &r.id == entity_id)
                    .ok_or_else(|| SyncError::StaleReference(entity_id.clone()))?;
                match self.updates.iter_mut().find(|u| &u.entity_id == entity_id) {
                    Some(update) => {
                        update.fields.insert(field.to_string(), value);
                    }
                    None => {
                        let mut fields = Fields::new();
                        fields.insert(field.to_string(), value);
                        self.updates.push(PendingUpdate {
                            entity_id: entity_id.clone(),
                            fields,
                            base_order_index: record.order_index,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn record_creation(&mut self, fields: Fields) -> String {
        let temp_id = EntityId::new_temp().as_str().to_string();
        self.creations.push(Draft {
            temp_id: temp_id.clone(),
            fields,
        });
        temp_id
    }

    /// Drafts are forgotten outright. Server entities are left untouched
    /// here: the deletion is issued remotely first and then `forget_entity`
    /// drops whatever was pending for it.
    pub fn record_deletion(&mut self, id: &EntityId) -> Result<Deletion, SyncError> {
        match id {
            EntityId::Temp(temp_id) => {
                let before = self.creations.len();
                self.creations.retain(|d| &d.temp_id != temp_id);
                if self.creations.len() == before {
                    return Err(SyncError::StaleReference(temp_id.clone()));
                }
                self.drop_from_order(id);
                Ok(Deletion::Forgotten)
            }
            EntityId::Persisted(entity_id) => Ok(Deletion::Remote(entity_id.clone())),
        }
    }

    /// Swaps the draft `temp_id` for the server entity it already became.
    /// Draft fields that differ from `record` turn into a pending update, and
    /// the draft's slot in a pending reorder now names the server id.
    pub fn adopt_created(&mut self, temp_id: &str, record: &Record) -> bool {
        let Some(pos) = self.creations.iter().position(|d| d.temp_id == temp_id) else {
            return false;
        };
        let draft = self.creations.remove(pos);
        let changed: Fields = draft
            .fields
            .into_iter()
            .filter(|(k, v)| record.fields.get(k) != Some(v))
            .collect();
        if !changed.is_empty() {
            self.updates.push(PendingUpdate {
                entity_id: record.id.clone(),
                fields: changed,
                base_order_index: record.order_index,
            });
        }
        if let Some(order) = self.order.as_mut() {
            for slot in order.iter_mut() {
                if slot.as_str() == temp_id {
                    *slot = EntityId::Persisted(record.id.clone());
                }
            }
        }
        true
    }

    pub fn forget_entity(&mut self, entity_id: &str) {
        self.updates.retain(|u| u.entity_id != entity_id);
        self.drop_from_order(&EntityId::Persisted(entity_id.to_string()));
    }

    /// Stores the desired final order. Later duplicates are ignored.
    pub fn set_order(&mut self, ids: Vec<EntityId>) {
        let mut order: Vec<EntityId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !order.contains(&id) {
                order.push(id);
            }
        }
        self.order = Some(order);
    }

    /// Only called once a bulk commit has fully succeeded.
    pub fn clear_all(&mut self) {
        self.updates.clear();
        self.creations.clear();
        self.order = None;
    }

    fn drop_from_order(&mut self, id: &EntityId) {
        if let Some(order) = self.order.as_mut() {
            order.retain(|o| o != id);
        }
    }
}
