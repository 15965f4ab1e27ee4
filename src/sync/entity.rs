use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

use super::error::SyncError;
use crate::settings::{BuilderSettings, LESSON_DURATION_RANGE};

pub const TEMP_ID_PREFIX: &str = "temp-";

pub type Fields = Map<String, JsonValue>;

/// Identifier of an entity shown in a builder view.
///
/// Server ids are UUIDs and never carry the `temp-` prefix, so the two
/// variants cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Persisted(String),
    Temp(String),
}

impl EntityId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with(TEMP_ID_PREFIX) {
            EntityId::Temp(raw.to_string())
        } else {
            EntityId::Persisted(raw.to_string())
        }
    }

    pub fn new_temp() -> Self {
        EntityId::Temp(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Persisted(id) | EntityId::Temp(id) => id,
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, EntityId::Temp(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a server snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub order_index: i64,
    pub fields: Fields,
    /// Temp id of the draft this entity was created from, if any.
    pub client_ref: Option<String>,
}

impl Record {
    pub fn to_json(&self) -> JsonValue {
        let mut obj = self.fields.clone();
        obj.insert("id".into(), json!(self.id));
        obj.insert("orderIndex".into(), json!(self.order_index));
        JsonValue::Object(obj)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Module,
    Lesson,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Lesson => "lesson",
        }
    }

    /// Normalizes one field edit. Rejections happen here, before the value
    /// can reach the tracker or the backend.
    pub fn validate_field(
        self,
        field: &str,
        value: &JsonValue,
        settings: &BuilderSettings,
    ) -> Result<JsonValue, SyncError> {
        match (self, field) {
            (_, "title") => {
                let Some(s) = value.as_str() else {
                    return Err(SyncError::validation(field, "must be a string"));
                };
                let s = s.trim();
                if s.is_empty() {
                    return Err(SyncError::validation(field, "must not be empty"));
                }
                if s.chars().count() > settings.max_title_length {
                    return Err(SyncError::validation(
                        field,
                        format!("must be at most {} characters", settings.max_title_length),
                    ));
                }
                Ok(json!(s))
            }
            (EntityKind::Module, "description") | (EntityKind::Lesson, "content") => {
                match value {
                    JsonValue::Null => Ok(json!("")),
                    JsonValue::String(s) => Ok(json!(s)),
                    _ => Err(SyncError::validation(field, "must be a string or null")),
                }
            }
            (EntityKind::Lesson, "durationMinutes") => {
                let Some(n) = value.as_i64() else {
                    return Err(SyncError::validation(field, "must be an integer"));
                };
                if !LESSON_DURATION_RANGE.contains(&n) {
                    return Err(SyncError::validation(
                        field,
                        format!(
                            "must be in {}..={}",
                            LESSON_DURATION_RANGE.start(),
                            LESSON_DURATION_RANGE.end()
                        ),
                    ));
                }
                Ok(json!(n))
            }
            (_, "orderIndex") => Err(SyncError::validation(
                field,
                "order is changed by reordering, not by editing",
            )),
            _ => Err(SyncError::validation(
                field,
                format!("unknown {} field", self.as_str()),
            )),
        }
    }

    /// Validates a complete draft. A title is required; lessons get the
    /// configured default duration when none is given.
    pub fn validate_draft(
        self,
        raw: &Fields,
        settings: &BuilderSettings,
    ) -> Result<Fields, SyncError> {
        let mut out = Fields::new();
        for (k, v) in raw {
            out.insert(k.clone(), self.validate_field(k, v, settings)?);
        }
        if !out.contains_key("title") {
            return Err(SyncError::validation("title", "is required"));
        }
        if self == EntityKind::Lesson && !out.contains_key("durationMinutes") {
            out.insert(
                "durationMinutes".into(),
                json!(settings.default_lesson_duration_minutes),
            );
        }
        Ok(out)
    }
}

/// The collection an editing session works on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Scope {
    #[serde(rename_all = "camelCase")]
    Modules { course_id: String },
    #[serde(rename_all = "camelCase")]
    Lessons { module_id: String },
}

impl Scope {
    pub fn kind(&self) -> EntityKind {
        match self {
            Scope::Modules { .. } => EntityKind::Module,
            Scope::Lessons { .. } => EntityKind::Lesson,
        }
    }

    pub fn parent_id(&self) -> &str {
        match self {
            Scope::Modules { course_id } => course_id,
            Scope::Lessons { module_id } => module_id,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Scope::Modules { course_id } => json!({ "kind": "modules", "courseId": course_id }),
            Scope::Lessons { module_id } => json!({ "kind": "lessons", "moduleId": module_id }),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Modules { course_id } => write!(f, "modules of course {}", course_id),
            Scope::Lessons { module_id } => write!(f, "lessons of module {}", module_id),
        }
    }
}
