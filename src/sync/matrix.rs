use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use log::{info, warn};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::SyncError;
use crate::backend::{Backend, BackendError};
use crate::settings::AttendanceSettings;

pub const MAX_ACTIVITY_SCORE: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    #[default]
    Pending,
    Attended,
    Late,
    Missed,
}

impl AttendanceStatus {
    /// pending -> attended -> late -> missed -> pending
    pub fn next(self) -> Self {
        match self {
            AttendanceStatus::Pending => AttendanceStatus::Attended,
            AttendanceStatus::Attended => AttendanceStatus::Late,
            AttendanceStatus::Late => AttendanceStatus::Missed,
            AttendanceStatus::Missed => AttendanceStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Attended => "attended",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Missed => "missed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(AttendanceStatus::Pending),
            "attended" => Some(AttendanceStatus::Attended),
            "late" => Some(AttendanceStatus::Late),
            "missed" => Some(AttendanceStatus::Missed),
            _ => None,
        }
    }

    pub fn allows_score(self) -> bool {
        matches!(self, AttendanceStatus::Attended | AttendanceStatus::Late)
    }
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionColumn {
    pub id: String,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
}

impl SessionColumn {
    /// A session becomes editable once its scheduled time has passed.
    pub fn is_editable(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceCell {
    pub student_id: String,
    pub session_id: String,
    pub status: AttendanceStatus,
    pub activity_score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceSnapshot {
    pub group_id: String,
    pub students: Vec<StudentRow>,
    pub sessions: Vec<SessionColumn>,
    pub cells: Vec<AttendanceCell>,
}

/// Wire shape of one changed cell in a batched save. `session_id` pins the
/// column `session_index` pointed at when the grid was loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceUpdate {
    pub group_id: String,
    pub session_index: usize,
    pub session_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub activity_score: Option<u8>,
}

impl AttendanceUpdate {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "groupId": self.group_id,
            "sessionIndex": self.session_index,
            "sessionId": self.session_id,
            "studentId": self.student_id,
            "status": self.status.as_str(),
            "activityScore": self.activity_score,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellValue {
    pub status: AttendanceStatus,
    pub activity_score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixEdit {
    Toggle {
        student_id: String,
        session_id: String,
    },
    SetScore {
        student_id: String,
        session_id: String,
        score: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentSummary {
    pub student_id: String,
    pub display_name: String,
    pub attended: usize,
    pub late: usize,
    pub missed: usize,
    pub unmarked: usize,
    pub average_score: Option<f64>,
    pub attendance_rate: Option<f64>,
}

impl StudentSummary {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "studentId": self.student_id,
            "displayName": self.display_name,
            "attended": self.attended,
            "late": self.late,
            "missed": self.missed,
            "unmarked": self.unmarked,
            "averageScore": self.average_score,
            "attendanceRate": self.attendance_rate,
        })
    }
}

/// Student x session grid of one group with buffered edits.
#[derive(Debug, Clone)]
pub struct StatusMatrix {
    group_id: String,
    students: Vec<StudentRow>,
    sessions: Vec<SessionColumn>,
    cells: HashMap<(String, String), CellValue>,
    // student id -> session ids touched since the last save
    changed: BTreeMap<String, BTreeSet<String>>,
    max_batch_edits: usize,
}

impl StatusMatrix {
    pub fn from_snapshot(snapshot: AttendanceSnapshot, settings: &AttendanceSettings) -> Self {
        let mut sessions = snapshot.sessions;
        sessions.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let cells = snapshot
            .cells
            .into_iter()
            .map(|c| {
                (
                    (c.student_id, c.session_id),
                    CellValue {
                        status: c.status,
                        activity_score: c.activity_score,
                    },
                )
            })
            .collect();
        Self {
            group_id: snapshot.group_id,
            students: snapshot.students,
            sessions,
            cells,
            changed: BTreeMap::new(),
            max_batch_edits: settings.max_batch_edits,
        }
    }

    pub fn load<B: Backend + ?Sized>(
        group_id: &str,
        backend: &B,
        settings: &AttendanceSettings,
    ) -> Result<Self, SyncError> {
        let snapshot = backend.fetch_attendance(group_id).map_err(SyncError::Load)?;
        Ok(Self::from_snapshot(snapshot, settings))
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn cell(&self, student_id: &str, session_id: &str) -> CellValue {
        self.cells
            .get(&(student_id.to_string(), session_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn unsaved_changes(&self) -> usize {
        self.changed.values().map(|s| s.len()).sum()
    }

    pub fn set_settings(&mut self, settings: &AttendanceSettings) {
        self.max_batch_edits = settings.max_batch_edits;
    }

    fn session(&self, session_id: &str) -> Result<&SessionColumn, SyncError> {
        self.sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| SyncError::StaleReference(session_id.to_string()))
    }

    fn check_student(&self, student_id: &str) -> Result<(), SyncError> {
        if self.students.iter().any(|s| s.id == student_id) {
            Ok(())
        } else {
            Err(SyncError::StaleReference(student_id.to_string()))
        }
    }

    fn write_cell(&mut self, student_id: &str, session_id: &str, value: CellValue) {
        self.cells
            .insert((student_id.to_string(), session_id.to_string()), value);
        self.changed
            .entry(student_id.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    /// Advances the cell one step through the status cycle. Returns `false`
    /// without touching anything when the session is still in the future.
    pub fn toggle_status(
        &mut self,
        student_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        self.check_student(student_id)?;
        if !self.session(session_id)?.is_editable(now) {
            return Ok(false);
        }
        let mut value = self.cell(student_id, session_id);
        value.status = value.status.next();
        if !value.status.allows_score() {
            value.activity_score = None;
        }
        self.write_cell(student_id, session_id, value);
        Ok(true)
    }

    /// `None` clears the score.
    pub fn set_activity_score(
        &mut self,
        student_id: &str,
        session_id: &str,
        score: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.check_student(student_id)?;
        if !self.session(session_id)?.is_editable(now) {
            return Err(SyncError::NotEditable(session_id.to_string()));
        }
        let mut value = self.cell(student_id, session_id);
        if score.is_some() && !value.status.allows_score() {
            return Err(SyncError::validation(
                "activityScore",
                "only attended or late sessions carry a score",
            ));
        }
        let score = match score {
            Some(s) if !(0..=MAX_ACTIVITY_SCORE).contains(&s) => {
                return Err(SyncError::validation(
                    "activityScore",
                    format!("must be in 0..={}", MAX_ACTIVITY_SCORE),
                ));
            }
            Some(s) => Some(s as u8),
            None => None,
        };
        value.activity_score = score;
        self.write_cell(student_id, session_id, value);
        Ok(())
    }

    /// Returns whether the grid changed.
    pub fn apply(&mut self, edit: MatrixEdit, now: DateTime<Utc>) -> Result<bool, SyncError> {
        match edit {
            MatrixEdit::Toggle {
                student_id,
                session_id,
            } => self.toggle_status(&student_id, &session_id, now),
            MatrixEdit::SetScore {
                student_id,
                session_id,
                score,
            } => self
                .set_activity_score(&student_id, &session_id, score, now)
                .map(|_| true),
        }
    }

    /// Changed cells in roster order, then column order.
    pub fn pending_updates(&self) -> Vec<AttendanceUpdate> {
        let mut out = Vec::with_capacity(self.unsaved_changes());
        for student in &self.students {
            let Some(touched) = self.changed.get(&student.id) else {
                continue;
            };
            for (session_index, session) in self.sessions.iter().enumerate() {
                if !touched.contains(&session.id) {
                    continue;
                }
                let value = self.cell(&student.id, &session.id);
                out.push(AttendanceUpdate {
                    group_id: self.group_id.clone(),
                    session_index,
                    session_id: session.id.clone(),
                    student_id: student.id.clone(),
                    status: value.status,
                    activity_score: value.activity_score,
                });
            }
        }
        out
    }

    /// Sends every changed cell in one batch. On failure the changed set and
    /// cell values stay as they are so nothing typed is lost.
    pub fn save_all<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<usize, SyncError> {
        let updates = self.pending_updates();
        if updates.is_empty() {
            return Ok(0);
        }
        if updates.len() > self.max_batch_edits {
            return Err(SyncError::BatchTooLarge {
                count: updates.len(),
                limit: self.max_batch_edits,
            });
        }
        backend
            .bulk_update_attendance(&self.group_id, &updates)
            .map_err(|e| match e {
                BackendError::Stale(session_id) => SyncError::StaleReference(session_id),
                other => SyncError::Save(other),
            })?;
        self.changed.clear();
        info!(
            "saved {} attendance cells for group {}",
            updates.len(),
            self.group_id
        );
        Ok(updates.len())
    }

    /// Swaps in a fresh snapshot and re-applies unsaved cells on top of it.
    /// Cells whose student or session is gone are dropped; returns how many.
    pub fn rebase(&mut self, snapshot: AttendanceSnapshot) -> usize {
        let mut fresh = Self::from_snapshot(
            snapshot,
            &AttendanceSettings {
                max_batch_edits: self.max_batch_edits,
            },
        );
        let mut dropped = 0;
        for (student_id, touched) in &self.changed {
            for session_id in touched {
                let known = fresh.students.iter().any(|s| &s.id == student_id)
                    && fresh.sessions.iter().any(|s| &s.id == session_id);
                if !known {
                    warn!(
                        "dropping unsaved attendance for {} in session {}: no longer in group {}",
                        student_id, session_id, self.group_id
                    );
                    dropped += 1;
                    continue;
                }
                let value = self.cell(student_id, session_id);
                fresh.write_cell(student_id, session_id, value);
            }
        }
        *self = fresh;
        dropped
    }

    /// Re-fetches the group keeping unsaved cells. A failed fetch changes nothing.
    pub fn reload<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<usize, SyncError> {
        let snapshot = backend
            .fetch_attendance(&self.group_id)
            .map_err(SyncError::Load)?;
        Ok(self.rebase(snapshot))
    }

    /// Per-student totals over sessions that have already happened,
    /// unsaved edits included.
    pub fn summary(&self, now: DateTime<Utc>) -> Vec<StudentSummary> {
        self.students
            .iter()
            .map(|student| {
                let mut s = StudentSummary {
                    student_id: student.id.clone(),
                    display_name: student.display_name.clone(),
                    attended: 0,
                    late: 0,
                    missed: 0,
                    unmarked: 0,
                    average_score: None,
                    attendance_rate: None,
                };
                let mut score_sum = 0u32;
                let mut score_count = 0u32;
                for session in self.sessions.iter().filter(|c| c.is_editable(now)) {
                    let value = self.cell(&student.id, &session.id);
                    match value.status {
                        AttendanceStatus::Pending => s.unmarked += 1,
                        AttendanceStatus::Attended => s.attended += 1,
                        AttendanceStatus::Late => s.late += 1,
                        AttendanceStatus::Missed => s.missed += 1,
                    }
                    if let Some(score) = value.activity_score {
                        score_sum += u32::from(score);
                        score_count += 1;
                    }
                }
                if score_count > 0 {
                    s.average_score = Some(f64::from(score_sum) / f64::from(score_count));
                }
                let marked = s.attended + s.late + s.missed;
                if marked > 0 {
                    s.attendance_rate = Some((s.attended + s.late) as f64 / marked as f64);
                }
                s
            })
            .collect()
    }

    pub fn to_json(&self, now: DateTime<Utc>) -> JsonValue {
        let sessions: Vec<JsonValue> = self
            .sessions
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                json!({
                    "id": s.id,
                    "index": idx,
                    "title": s.title,
                    "scheduledAt": format_timestamp(&s.scheduled_at),
                    "editable": s.is_editable(now),
                })
            })
            .collect();
        let rows: Vec<JsonValue> = self
            .students
            .iter()
            .map(|student| {
                let touched = self.changed.get(&student.id);
                let cells: Vec<JsonValue> = self
                    .sessions
                    .iter()
                    .map(|session| {
                        let value = self.cell(&student.id, &session.id);
                        json!({
                            "sessionId": session.id,
                            "status": value.status.as_str(),
                            "activityScore": value.activity_score,
                            "changed": touched.map(|t| t.contains(&session.id)).unwrap_or(false),
                        })
                    })
                    .collect();
                json!({
                    "studentId": student.id,
                    "displayName": student.display_name,
                    "cells": cells,
                })
            })
            .collect();
        json!({
            "groupId": self.group_id,
            "sessions": sessions,
            "rows": rows,
            "unsavedChanges": self.unsaved_changes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeBackend;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2025-03-10T12:00:00Z").expect("timestamp")
    }

    fn matrix(sessions: &[(&str, &str)]) -> StatusMatrix {
        let snapshot = AttendanceSnapshot {
            group_id: "g1".into(),
            students: vec![
                StudentRow {
                    id: "s1".into(),
                    display_name: "Ada".into(),
                },
                StudentRow {
                    id: "s2".into(),
                    display_name: "Grace".into(),
                },
            ],
            sessions: sessions
                .iter()
                .map(|(id, at)| SessionColumn {
                    id: id.to_string(),
                    title: format!("Lesson {}", id),
                    scheduled_at: parse_timestamp(at).expect("timestamp"),
                })
                .collect(),
            cells: Vec::new(),
        };
        StatusMatrix::from_snapshot(snapshot, &AttendanceSettings::default())
    }

    #[test]
    fn four_toggles_cycle_back_to_pending() {
        let mut m = matrix(&[("past", "2025-03-01")]);
        let mut seen = Vec::new();
        for _ in 0..4 {
            assert!(m.toggle_status("s1", "past", now()).expect("toggle"));
            seen.push(m.cell("s1", "past").status);
        }
        assert_eq!(
            seen,
            vec![
                AttendanceStatus::Attended,
                AttendanceStatus::Late,
                AttendanceStatus::Missed,
                AttendanceStatus::Pending
            ]
        );
    }

    #[test]
    fn future_sessions_ignore_toggles_until_they_happen() {
        let mut m = matrix(&[("soon", "2025-03-10T13:00:00Z")]);
        assert!(!m.toggle_status("s1", "soon", now()).expect("toggle"));
        assert_eq!(m.cell("s1", "soon").status, AttendanceStatus::Pending);
        assert_eq!(m.unsaved_changes(), 0);

        // Same matrix, later clock: no cached "future" flag.
        let later = now() + Duration::hours(2);
        assert!(m.toggle_status("s1", "soon", later).expect("toggle"));
        assert_eq!(m.cell("s1", "soon").status, AttendanceStatus::Attended);
    }

    #[test]
    fn two_toggles_then_save_sends_one_late_update() {
        let backend = FakeBackend::default();
        let mut m = matrix(&[("past", "2025-03-01")]);
        m.toggle_status("s1", "past", now()).expect("toggle");
        m.toggle_status("s1", "past", now()).expect("toggle");
        assert_eq!(m.cell("s1", "past").status, AttendanceStatus::Late);
        assert_eq!(m.unsaved_changes(), 1);

        assert_eq!(m.save_all(&backend).expect("save"), 1);
        let batches = backend.attendance_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![AttendanceUpdate {
                group_id: "g1".into(),
                session_index: 0,
                session_id: "past".into(),
                student_id: "s1".into(),
                status: AttendanceStatus::Late,
                activity_score: None,
            }]
        );
        assert_eq!(m.unsaved_changes(), 0);
    }

    #[test]
    fn failed_save_keeps_edits() {
        let backend = FakeBackend::default();
        let mut m = matrix(&[("a", "2025-03-01"), ("b", "2025-03-02")]);
        m.toggle_status("s1", "a", now()).expect("toggle");
        m.toggle_status("s2", "b", now()).expect("toggle");
        backend.fail_on_call(1);
        let e = m.save_all(&backend).expect_err("save fails");
        assert_eq!(e.code(), "save_failed");
        assert_eq!(m.unsaved_changes(), 2);
        assert_eq!(m.cell("s2", "b").status, AttendanceStatus::Attended);
        assert_eq!(m.save_all(&backend).expect("retry"), 2);
    }

    #[test]
    fn scores_are_checked_at_the_boundary() {
        let mut m = matrix(&[("past", "2025-03-01"), ("future", "2025-04-01")]);
        let e = m
            .set_activity_score("s1", "past", Some(5), now())
            .expect_err("pending has no score");
        assert_eq!(e.code(), "validation_failed");

        m.toggle_status("s1", "past", now()).expect("toggle");
        assert!(m.set_activity_score("s1", "past", Some(11), now()).is_err());
        assert!(m.set_activity_score("s1", "past", Some(-1), now()).is_err());
        assert_eq!(m.cell("s1", "past").activity_score, None);
        m.set_activity_score("s1", "past", Some(10), now())
            .expect("in range");
        assert_eq!(m.cell("s1", "past").activity_score, Some(10));

        let e = m
            .set_activity_score("s1", "future", Some(3), now())
            .expect_err("future");
        assert_eq!(e.code(), "not_editable");
    }

    #[test]
    fn leaving_scored_statuses_clears_score() {
        let mut m = matrix(&[("past", "2025-03-01")]);
        m.toggle_status("s1", "past", now()).expect("attended");
        m.set_activity_score("s1", "past", Some(7), now())
            .expect("score");
        m.toggle_status("s1", "past", now()).expect("late");
        assert_eq!(m.cell("s1", "past").activity_score, Some(7));
        m.toggle_status("s1", "past", now()).expect("missed");
        assert_eq!(m.cell("s1", "past").activity_score, None);
    }

    #[test]
    fn sessions_are_columns_in_date_order() {
        let mut m = matrix(&[("late", "2025-03-05"), ("early", "2025-03-01")]);
        m.toggle_status("s1", "late", now()).expect("toggle");
        let updates = m.pending_updates();
        assert_eq!(updates[0].session_index, 1);
    }

    #[test]
    fn unknown_cells_are_stale() {
        let mut m = matrix(&[("past", "2025-03-01")]);
        assert_eq!(
            m.toggle_status("nobody", "past", now())
                .expect_err("stale")
                .code(),
            "stale_reference"
        );
        assert_eq!(
            m.toggle_status("s1", "nope", now())
                .expect_err("stale")
                .code(),
            "stale_reference"
        );
    }

    #[test]
    fn oversized_batches_are_rejected_before_sending() {
        let backend = FakeBackend::default();
        let snapshot = AttendanceSnapshot {
            group_id: "g1".into(),
            students: vec![StudentRow {
                id: "s1".into(),
                display_name: "Ada".into(),
            }],
            sessions: vec![
                SessionColumn {
                    id: "a".into(),
                    title: "A".into(),
                    scheduled_at: parse_timestamp("2025-03-01").expect("ts"),
                },
                SessionColumn {
                    id: "b".into(),
                    title: "B".into(),
                    scheduled_at: parse_timestamp("2025-03-02").expect("ts"),
                },
            ],
            cells: Vec::new(),
        };
        let mut m = StatusMatrix::from_snapshot(
            snapshot,
            &AttendanceSettings { max_batch_edits: 1 },
        );
        m.toggle_status("s1", "a", now()).expect("toggle");
        m.toggle_status("s1", "b", now()).expect("toggle");
        let e = m.save_all(&backend).expect_err("too many");
        assert_eq!(e.code(), "validation_failed");
        assert_eq!(backend.calls(), 0);
    }

    fn column(id: &str, at: &str) -> SessionColumn {
        SessionColumn {
            id: id.into(),
            title: id.to_uppercase(),
            scheduled_at: parse_timestamp(at).expect("timestamp"),
        }
    }

    #[test]
    fn save_after_an_earlier_session_appears_is_stale_until_reloaded() {
        let backend = FakeBackend::default();
        backend.set_attendance(AttendanceSnapshot {
            group_id: "g1".into(),
            students: vec![StudentRow {
                id: "s1".into(),
                display_name: "Ada".into(),
            }],
            sessions: vec![column("b", "2025-03-05")],
            cells: Vec::new(),
        });
        let mut m =
            StatusMatrix::load("g1", &backend, &AttendanceSettings::default()).expect("load");
        m.toggle_status("s1", "b", now()).expect("toggle");

        // Sorts before `b`, so `b` is column 1 on the server now.
        backend.add_attendance_session(column("a", "2025-03-01"));
        let e = m.save_all(&backend).expect_err("columns shifted");
        assert_eq!(e.code(), "stale_reference");
        assert_eq!(m.unsaved_changes(), 1);
        assert!(backend.attendance_cells().is_empty());

        assert_eq!(m.reload(&backend).expect("reload"), 0);
        assert_eq!(m.cell("s1", "b").status, AttendanceStatus::Attended);
        assert_eq!(m.unsaved_changes(), 1);
        assert_eq!(m.pending_updates()[0].session_index, 1);

        assert_eq!(m.save_all(&backend).expect("save"), 1);
        let cells = backend.attendance_cells();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].session_id, "b");
        assert_eq!(cells[0].status, AttendanceStatus::Attended);
    }

    #[test]
    fn rebase_drops_edits_for_sessions_that_are_gone() {
        let mut m = matrix(&[("a", "2025-03-01"), ("b", "2025-03-02")]);
        m.toggle_status("s1", "a", now()).expect("toggle");
        m.toggle_status("s2", "b", now()).expect("toggle");
        let dropped = m.rebase(AttendanceSnapshot {
            group_id: "g1".into(),
            students: vec![
                StudentRow {
                    id: "s1".into(),
                    display_name: "Ada".into(),
                },
                StudentRow {
                    id: "s2".into(),
                    display_name: "Grace".into(),
                },
            ],
            sessions: vec![column("a", "2025-03-01")],
            cells: vec![AttendanceCell {
                student_id: "s2".into(),
                session_id: "a".into(),
                status: AttendanceStatus::Missed,
                activity_score: None,
            }],
        });
        assert_eq!(dropped, 1);
        assert_eq!(m.unsaved_changes(), 1);
        assert_eq!(m.cell("s1", "a").status, AttendanceStatus::Attended);
        assert_eq!(m.cell("s2", "a").status, AttendanceStatus::Missed);
    }

    #[test]
    fn summary_counts_past_sessions_only() {
        let mut m = matrix(&[
            ("a", "2025-03-01"),
            ("b", "2025-03-02"),
            ("c", "2025-03-03"),
            ("future", "2025-05-01"),
        ]);
        m.toggle_status("s1", "a", now()).expect("attended");
        m.set_activity_score("s1", "a", Some(8), now()).expect("score");
        m.toggle_status("s1", "b", now()).expect("attended");
        m.toggle_status("s1", "b", now()).expect("late");
        m.set_activity_score("s1", "b", Some(6), now()).expect("score");
        for _ in 0..3 {
            m.toggle_status("s1", "c", now()).expect("toggle");
        }
        let summary = m.summary(now());
        let ada = &summary[0];
        assert_eq!((ada.attended, ada.late, ada.missed, ada.unmarked), (1, 1, 1, 0));
        assert_eq!(ada.average_score, Some(7.0));
        assert_eq!(ada.attendance_rate, Some(2.0 / 3.0));
        let grace = &summary[1];
        assert_eq!(grace.unmarked, 3);
        assert_eq!(grace.attendance_rate, None);
    }
}
