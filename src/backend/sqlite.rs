use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use std::ops::RangeInclusive;
use uuid::Uuid;

use super::{Backend, BackendError};
use crate::db::now_ts;
use crate::settings::{self, LESSON_DURATION_RANGE};
use crate::sync::entity::{EntityKind, Fields, Record, Scope};
use crate::sync::matrix::{
    parse_timestamp, AttendanceCell, AttendanceSnapshot, AttendanceStatus, AttendanceUpdate,
    SessionColumn, StudentRow, MAX_ACTIVITY_SCORE,
};

const SELECT_MODULE: &str =
    "SELECT id, sort_order, title, description, client_ref FROM course_modules";
const SELECT_LESSON: &str =
    "SELECT id, sort_order, title, content, duration_minutes, client_ref FROM module_lessons";

/// `Backend` over the workspace database.
pub struct SqliteBackend<'a> {
    conn: &'a Connection,
}

fn table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Module => ("course_modules", "course_id"),
        EntityKind::Lesson => ("module_lessons", "module_id"),
    }
}

fn record_from_row(kind: EntityKind, r: &Row<'_>) -> rusqlite::Result<Record> {
    let mut fields = Fields::new();
    fields.insert("title".into(), json!(r.get::<_, String>(2)?));
    let client_ref = match kind {
        EntityKind::Module => {
            fields.insert("description".into(), json!(r.get::<_, String>(3)?));
            r.get(4)?
        }
        EntityKind::Lesson => {
            fields.insert("content".into(), json!(r.get::<_, String>(3)?));
            fields.insert("durationMinutes".into(), json!(r.get::<_, i64>(4)?));
            r.get(5)?
        }
    };
    Ok(Record {
        id: r.get(0)?,
        order_index: r.get(1)?,
        fields,
        client_ref,
    })
}

fn text_field(fields: &Fields, key: &str) -> Result<Option<String>, BackendError> {
    match fields.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(String::new())),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| BackendError::Rejected(format!("{} must be a string", key))),
    }
}

fn title_field(fields: &Fields) -> Result<Option<String>, BackendError> {
    match text_field(fields, "title")? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => {
            Err(BackendError::Rejected("title must not be empty".into()))
        }
        Some(s) => Ok(Some(s.trim().to_string())),
    }
}

const SORT_ORDER_RANGE: RangeInclusive<i64> = 0..=i64::MAX;

fn int_field(
    fields: &Fields,
    key: &str,
    range: RangeInclusive<i64>,
) -> Result<Option<i64>, BackendError> {
    match fields.get(key) {
        None => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if range.contains(&n) => Ok(Some(n)),
            _ => Err(BackendError::Rejected(format!(
                "{} must be an integer in {}..={}",
                key,
                range.start(),
                range.end()
            ))),
        },
    }
}

fn check_known_fields(kind: EntityKind, fields: &Fields) -> Result<(), BackendError> {
    for key in fields.keys() {
        let known = match kind {
            EntityKind::Module => matches!(key.as_str(), "title" | "description" | "orderIndex"),
            EntityKind::Lesson => matches!(
                key.as_str(),
                "title" | "content" | "durationMinutes" | "orderIndex"
            ),
        };
        if !known {
            return Err(BackendError::Rejected(format!(
                "unknown {} field: {}",
                kind.as_str(),
                key
            )));
        }
    }
    Ok(())
}

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn ensure_parent(&self, scope: &Scope) -> Result<(), BackendError> {
        let (sql, what) = match scope {
            Scope::Modules { .. } => ("SELECT 1 FROM courses WHERE id = ?", "course"),
            Scope::Lessons { .. } => ("SELECT 1 FROM course_modules WHERE id = ?", "module"),
        };
        let found = self
            .conn
            .query_row(sql, [scope.parent_id()], |r| r.get::<_, i64>(0))
            .optional()?;
        if found.is_none() {
            return Err(BackendError::NotFound(format!(
                "{} {}",
                what,
                scope.parent_id()
            )));
        }
        Ok(())
    }

    fn ensure_group(&self, group_id: &str) -> Result<(), BackendError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM study_groups WHERE id = ?", [group_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?;
        if found.is_none() {
            return Err(BackendError::NotFound(format!("group {}", group_id)));
        }
        Ok(())
    }

    fn fetch_one(&self, scope: &Scope, id: &str) -> Result<Option<Record>, BackendError> {
        let kind = scope.kind();
        let (_, parent_col) = table(kind);
        let select = match kind {
            EntityKind::Module => SELECT_MODULE,
            EntityKind::Lesson => SELECT_LESSON,
        };
        let sql = format!("{} WHERE {} = ? AND id = ?", select, parent_col);
        Ok(self
            .conn
            .query_row(&sql, params![scope.parent_id(), id], |r| {
                record_from_row(kind, r)
            })
            .optional()?)
    }

    fn find_by_client_ref(
        &self,
        scope: &Scope,
        client_ref: &str,
    ) -> Result<Option<Record>, BackendError> {
        let (table_name, parent_col) = table(scope.kind());
        let sql = format!(
            "SELECT id FROM {} WHERE {} = ? AND client_ref = ?",
            table_name, parent_col
        );
        let id: Option<String> = self
            .conn
            .query_row(&sql, params![scope.parent_id(), client_ref], |r| r.get(0))
            .optional()?;
        match id {
            Some(id) => self.fetch_one(scope, &id),
            None => Ok(None),
        }
    }

    fn next_sort_order(&self, scope: &Scope) -> Result<i64, BackendError> {
        let (table_name, parent_col) = table(scope.kind());
        let sql = format!(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {} WHERE {} = ?",
            table_name, parent_col
        );
        let next: i64 = self
            .conn
            .query_row(&sql, [scope.parent_id()], |r| r.get(0))?;
        Ok(next.max(0))
    }

    fn sessions_in_order(&self, group_id: &str) -> Result<Vec<SessionColumn>, BackendError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, scheduled_at FROM lesson_sessions
             WHERE group_id = ?
             ORDER BY scheduled_at, id",
        )?;
        let rows = stmt
            .query_map([group_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, title, raw)| {
                let scheduled_at = parse_timestamp(&raw).ok_or_else(|| {
                    BackendError::Storage(format!("bad scheduled_at for session {}: {}", id, raw))
                })?;
                Ok(SessionColumn {
                    id,
                    title,
                    scheduled_at,
                })
            })
            .collect()
    }
}

impl Backend for SqliteBackend<'_> {
    fn fetch_collection(&self, scope: &Scope) -> Result<Vec<Record>, BackendError> {
        self.ensure_parent(scope)?;
        let kind = scope.kind();
        let (_, parent_col) = table(kind);
        let select = match kind {
            EntityKind::Module => SELECT_MODULE,
            EntityKind::Lesson => SELECT_LESSON,
        };
        let sql = format!("{} WHERE {} = ? ORDER BY sort_order, id", select, parent_col);
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([scope.parent_id()], |r| record_from_row(kind, r))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn create_entity(
        &self,
        scope: &Scope,
        client_ref: &str,
        fields: &Fields,
    ) -> Result<Record, BackendError> {
        self.ensure_parent(scope)?;
        if let Some(existing) = self.find_by_client_ref(scope, client_ref)? {
            return Ok(existing);
        }
        let kind = scope.kind();
        check_known_fields(kind, fields)?;
        let title =
            title_field(fields)?.ok_or_else(|| BackendError::Rejected("title is required".into()))?;
        let sort_order = match int_field(fields, "orderIndex", SORT_ORDER_RANGE)? {
            Some(v) => v,
            None => self.next_sort_order(scope)?,
        };

        let id = Uuid::new_v4().to_string();
        let ts = now_ts();
        match kind {
            EntityKind::Module => {
                let description = text_field(fields, "description")?.unwrap_or_default();
                self.conn.execute(
                    "INSERT INTO course_modules(
                        id, course_id, sort_order, title, description, client_ref, created_at, updated_at
                     ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                    params![id, scope.parent_id(), sort_order, title, description, client_ref, ts, ts],
                )?;
            }
            EntityKind::Lesson => {
                let content = text_field(fields, "content")?.unwrap_or_default();
                let duration = match int_field(fields, "durationMinutes", LESSON_DURATION_RANGE)? {
                    Some(v) => v,
                    None => settings::load_builder_settings(self.conn).default_lesson_duration_minutes,
                };
                self.conn.execute(
                    "INSERT INTO module_lessons(
                        id, module_id, sort_order, title, content, duration_minutes, client_ref, created_at, updated_at
                     ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        id,
                        scope.parent_id(),
                        sort_order,
                        title,
                        content,
                        duration,
                        client_ref,
                        ts,
                        ts
                    ],
                )?;
            }
        }
        self.fetch_one(scope, &id)?
            .ok_or_else(|| BackendError::Storage("created row vanished".into()))
    }

    fn update_entity(
        &self,
        scope: &Scope,
        id: &str,
        patch: &Fields,
    ) -> Result<Record, BackendError> {
        let kind = scope.kind();
        check_known_fields(kind, patch)?;
        if self.fetch_one(scope, id)?.is_none() {
            return Err(BackendError::NotFound(format!("{} {}", kind.as_str(), id)));
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(title) = title_field(patch)? {
            sets.push("title = ?");
            values.push(Value::Text(title));
        }
        if let Some(v) = text_field(patch, "description")? {
            sets.push("description = ?");
            values.push(Value::Text(v));
        }
        if let Some(v) = text_field(patch, "content")? {
            sets.push("content = ?");
            values.push(Value::Text(v));
        }
        if let Some(v) = int_field(patch, "durationMinutes", LESSON_DURATION_RANGE)? {
            sets.push("duration_minutes = ?");
            values.push(Value::Integer(v));
        }
        if let Some(v) = int_field(patch, "orderIndex", SORT_ORDER_RANGE)? {
            sets.push("sort_order = ?");
            values.push(Value::Integer(v));
        }
        if !sets.is_empty() {
            sets.push("updated_at = ?");
            values.push(Value::Text(now_ts()));
            values.push(Value::Text(scope.parent_id().to_string()));
            values.push(Value::Text(id.to_string()));
            let (table_name, parent_col) = table(kind);
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ? AND id = ?",
                table_name,
                sets.join(", "),
                parent_col
            );
            self.conn.execute(&sql, params_from_iter(values))?;
        }
        self.fetch_one(scope, id)?
            .ok_or_else(|| BackendError::NotFound(format!("{} {}", kind.as_str(), id)))
    }

    fn delete_entity(&self, scope: &Scope, id: &str) -> Result<(), BackendError> {
        let kind = scope.kind();
        let (table_name, parent_col) = table(kind);
        let tx = self.conn.unchecked_transaction()?;
        if kind == EntityKind::Module {
            tx.execute("DELETE FROM module_lessons WHERE module_id = ?", [id])?;
        }
        let deleted = tx.execute(
            &format!("DELETE FROM {} WHERE {} = ? AND id = ?", table_name, parent_col),
            params![scope.parent_id(), id],
        )?;
        if deleted == 0 {
            return Err(BackendError::NotFound(format!("{} {}", kind.as_str(), id)));
        }

        // Keep sibling order dense so new drafts can append at `len`.
        let remaining: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM {} WHERE {} = ? ORDER BY sort_order, id",
                table_name, parent_col
            ))?;
            let ids = stmt
                .query_map([scope.parent_id()], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let ts = now_ts();
        for (idx, sibling) in remaining.iter().enumerate() {
            tx.execute(
                &format!(
                    "UPDATE {} SET sort_order = ?, updated_at = ? WHERE id = ?",
                    table_name
                ),
                params![idx as i64, ts, sibling],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_attendance(&self, group_id: &str) -> Result<AttendanceSnapshot, BackendError> {
        self.ensure_group(group_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name FROM students WHERE group_id = ? ORDER BY sort_order, id",
        )?;
        let students = stmt
            .query_map([group_id], |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    display_name: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let sessions = self.sessions_in_order(group_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT student_id, session_id, status, activity_score
             FROM attendance_cells
             WHERE group_id = ?",
        )?;
        let raw_cells = stmt
            .query_map([group_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut cells = Vec::with_capacity(raw_cells.len());
        for (student_id, session_id, status, score) in raw_cells {
            let status = AttendanceStatus::parse(&status).ok_or_else(|| {
                BackendError::Storage(format!("unknown attendance status: {}", status))
            })?;
            cells.push(AttendanceCell {
                student_id,
                session_id,
                status,
                activity_score: score.and_then(|s| u8::try_from(s).ok()),
            });
        }

        Ok(AttendanceSnapshot {
            group_id: group_id.to_string(),
            students,
            sessions,
            cells,
        })
    }

    fn bulk_update_attendance(
        &self,
        group_id: &str,
        updates: &[AttendanceUpdate],
    ) -> Result<(), BackendError> {
        self.ensure_group(group_id)?;
        let sessions = self.sessions_in_order(group_id)?;
        let now = Utc::now();
        let ts = now_ts();

        // Dropping the transaction on an early return rolls everything back.
        let tx = self.conn.unchecked_transaction()?;
        for u in updates {
            if u.group_id != group_id {
                return Err(BackendError::Rejected(format!(
                    "update for group {} sent to group {}",
                    u.group_id, group_id
                )));
            }
            // Columns shift when sessions are added or removed after the
            // caller loaded its grid; the index must still name the same one.
            let session = match sessions.get(u.session_index) {
                Some(s) if s.id == u.session_id => s,
                _ => return Err(BackendError::Stale(u.session_id.clone())),
            };
            if !session.is_editable(now) {
                return Err(BackendError::Rejected(format!(
                    "session {} has not started yet",
                    session.id
                )));
            }
            if let Some(score) = u.activity_score {
                if i64::from(score) > MAX_ACTIVITY_SCORE {
                    return Err(BackendError::Rejected(format!(
                        "activity score {} out of range",
                        score
                    )));
                }
                if !u.status.allows_score() {
                    return Err(BackendError::Rejected(format!(
                        "status {} carries no activity score",
                        u.status.as_str()
                    )));
                }
            }
            let member = tx
                .query_row(
                    "SELECT 1 FROM students WHERE group_id = ? AND id = ?",
                    params![group_id, u.student_id],
                    |r| r.get::<_, i64>(0),
                )
                .optional()?;
            if member.is_none() {
                return Err(BackendError::NotFound(format!("student {}", u.student_id)));
            }
            tx.execute(
                "INSERT INTO attendance_cells(group_id, session_id, student_id, status, activity_score, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, student_id) DO UPDATE SET
                   status = excluded.status,
                   activity_score = excluded.activity_score,
                   updated_at = excluded.updated_at",
                params![
                    group_id,
                    session.id,
                    u.student_id,
                    u.status.as_str(),
                    u.activity_score.map(i64::from),
                    ts
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
