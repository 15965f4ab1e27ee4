use log::warn;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use super::entity::{EntityId, Fields, Record};
use super::tracker::PendingTracker;

/// One line of the list the user sees.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEntry {
    Persisted {
        id: String,
        fields: Fields,
        order_index: i64,
        edited: bool,
    },
    Draft {
        temp_id: String,
        fields: Fields,
        order_index: i64,
    },
}

impl ViewEntry {
    pub fn entity_id(&self) -> EntityId {
        match self {
            ViewEntry::Persisted { id, .. } => EntityId::Persisted(id.clone()),
            ViewEntry::Draft { temp_id, .. } => EntityId::Temp(temp_id.clone()),
        }
    }

    pub fn fields(&self) -> &Fields {
        match self {
            ViewEntry::Persisted { fields, .. } | ViewEntry::Draft { fields, .. } => fields,
        }
    }

    pub fn order_index(&self) -> i64 {
        match self {
            ViewEntry::Persisted { order_index, .. } | ViewEntry::Draft { order_index, .. } => {
                *order_index
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        match self {
            ViewEntry::Persisted { edited, .. } => *edited,
            ViewEntry::Draft { .. } => true,
        }
    }

    fn set_order_index(&mut self, idx: i64) {
        match self {
            ViewEntry::Persisted { order_index, .. } | ViewEntry::Draft { order_index, .. } => {
                *order_index = idx
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut obj = self.fields().clone();
        obj.insert("id".into(), json!(self.entity_id().as_str()));
        obj.insert("orderIndex".into(), json!(self.order_index()));
        obj.insert("isPending".into(), json!(self.is_pending()));
        obj.insert(
            "isDraft".into(),
            json!(matches!(self, ViewEntry::Draft { .. })),
        );
        JsonValue::Object(obj)
    }
}

/// Merges the server snapshot with everything pending. Pure: equal inputs
/// give equal output, so callers may rebuild on every render.
pub fn reconcile(base: &[Record], pending: &PendingTracker) -> Vec<ViewEntry> {
    let mut entries: Vec<ViewEntry> = Vec::with_capacity(base.len() + pending.creations().len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(base.len());

    for record in base {
        seen.insert(record.id.as_str());
        let entry = match pending.update_for(&record.id) {
            Some(update) => {
                let mut fields = record.fields.clone();
                for (k, v) in &update.fields {
                    fields.insert(k.clone(), v.clone());
                }
                ViewEntry::Persisted {
                    id: record.id.clone(),
                    fields,
                    order_index: record.order_index,
                    edited: true,
                }
            }
            None => ViewEntry::Persisted {
                id: record.id.clone(),
                fields: record.fields.clone(),
                order_index: record.order_index,
                edited: false,
            },
        };
        entries.push(entry);
    }

    for draft in pending.creations() {
        if seen.contains(draft.temp_id.as_str()) {
            warn!(
                "draft {} collides with a server entity; keeping the server entity",
                draft.temp_id
            );
            continue;
        }
        entries.push(ViewEntry::Draft {
            temp_id: draft.temp_id.clone(),
            fields: draft.fields.clone(),
            order_index: 0,
        });
    }

    if let Some(order) = pending.order() {
        let rank: HashMap<&EntityId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let natural: Vec<(usize, ViewEntry)> = entries.into_iter().enumerate().collect();
        let mut ranked: Vec<(usize, usize, ViewEntry)> = natural
            .into_iter()
            .map(|(pos, entry)| {
                // Entries missing from the intent keep natural order after it.
                let r = rank
                    .get(&entry.entity_id())
                    .copied()
                    .unwrap_or(order.len() + pos);
                (r, pos, entry)
            })
            .collect();
        ranked.sort_by_key(|(r, pos, _)| (*r, *pos));
        entries = ranked.into_iter().map(|(_, _, e)| e).collect();
    }

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.set_order_index(i as i64);
    }
    entries
}
