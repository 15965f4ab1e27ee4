//! In-memory backend for unit tests. Counts calls and can fail one of them.

use serde_json::json;
use std::cell::RefCell;

use super::entity::{Fields, Record, Scope};
use super::matrix::{AttendanceCell, AttendanceSnapshot, AttendanceUpdate, SessionColumn};
use crate::backend::{Backend, BackendError};

#[derive(Debug)]
struct Row {
    parent_id: String,
    record: Record,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    next_id: usize,
    calls: usize,
    fail_at: Option<usize>,
    batches: Vec<Vec<AttendanceUpdate>>,
    attendance: Option<AttendanceSnapshot>,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    state: RefCell<State>,
}

impl FakeBackend {
    /// Modules of course `c1`, in the given order.
    pub fn with_titles(titles: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut st = backend.state.borrow_mut();
            for (i, title) in titles.iter().enumerate() {
                st.next_id += 1;
                let mut fields = Fields::new();
                fields.insert("title".into(), json!(title));
                let id = format!("srv-{}", st.next_id);
                st.rows.push(Row {
                    parent_id: "c1".into(),
                    record: Record {
                        id,
                        order_index: i as i64,
                        fields,
                        client_ref: None,
                    },
                });
            }
        }
        backend
    }

    /// Makes the `n`-th call from now fail once.
    pub fn fail_on_call(&self, n: usize) {
        let mut st = self.state.borrow_mut();
        st.fail_at = Some(st.calls + n);
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    pub fn row_count(&self) -> usize {
        self.state.borrow().rows.len()
    }

    pub fn attendance_batches(&self) -> Vec<Vec<AttendanceUpdate>> {
        self.state.borrow().batches.clone()
    }

    /// Serves `snapshot` from `fetch_attendance` and checks saves against it.
    pub fn set_attendance(&self, snapshot: AttendanceSnapshot) {
        self.state.borrow_mut().attendance = Some(snapshot);
    }

    pub fn add_attendance_session(&self, session: SessionColumn) {
        if let Some(snapshot) = self.state.borrow_mut().attendance.as_mut() {
            snapshot.sessions.push(session);
        }
    }

    pub fn attendance_cells(&self) -> Vec<AttendanceCell> {
        self.state
            .borrow()
            .attendance
            .as_ref()
            .map(|a| a.cells.clone())
            .unwrap_or_default()
    }

    fn tick(&self) -> Result<(), BackendError> {
        let mut st = self.state.borrow_mut();
        st.calls += 1;
        if st.fail_at == Some(st.calls) {
            st.fail_at = None;
            return Err(BackendError::Storage("injected failure".into()));
        }
        Ok(())
    }
}

fn apply_fields(record: &mut Record, fields: &Fields) {
    for (k, v) in fields {
        if k == "orderIndex" {
            record.order_index = v.as_i64().unwrap_or(record.order_index);
        } else {
            record.fields.insert(k.clone(), v.clone());
        }
    }
}

impl Backend for FakeBackend {
    fn fetch_collection(&self, scope: &Scope) -> Result<Vec<Record>, BackendError> {
        self.tick()?;
        let st = self.state.borrow();
        let mut out: Vec<Record> = st
            .rows
            .iter()
            .filter(|r| r.parent_id == scope.parent_id())
            .map(|r| r.record.clone())
            .collect();
        out.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn create_entity(
        &self,
        scope: &Scope,
        client_ref: &str,
        fields: &Fields,
    ) -> Result<Record, BackendError> {
        self.tick()?;
        let mut st = self.state.borrow_mut();
        if let Some(existing) = st.rows.iter().find(|r| {
            r.parent_id == scope.parent_id() && r.record.client_ref.as_deref() == Some(client_ref)
        }) {
            return Ok(existing.record.clone());
        }
        st.next_id += 1;
        let mut record = Record {
            id: format!("srv-{}", st.next_id),
            order_index: 0,
            fields: Fields::new(),
            client_ref: Some(client_ref.to_string()),
        };
        apply_fields(&mut record, fields);
        st.rows.push(Row {
            parent_id: scope.parent_id().to_string(),
            record: record.clone(),
        });
        Ok(record)
    }

    fn update_entity(
        &self,
        _scope: &Scope,
        id: &str,
        patch: &Fields,
    ) -> Result<Record, BackendError> {
        self.tick()?;
        let mut st = self.state.borrow_mut();
        let row = st
            .rows
            .iter_mut()
            .find(|r| r.record.id == id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        apply_fields(&mut row.record, patch);
        Ok(row.record.clone())
    }

    fn delete_entity(&self, scope: &Scope, id: &str) -> Result<(), BackendError> {
        self.tick()?;
        let mut st = self.state.borrow_mut();
        let before = st.rows.len();
        st.rows.retain(|r| r.record.id != id);
        if st.rows.len() == before {
            return Err(BackendError::NotFound(id.to_string()));
        }
        let mut siblings: Vec<&mut Row> = st
            .rows
            .iter_mut()
            .filter(|r| r.parent_id == scope.parent_id())
            .collect();
        siblings.sort_by_key(|r| r.record.order_index);
        for (i, row) in siblings.into_iter().enumerate() {
            row.record.order_index = i as i64;
        }
        Ok(())
    }

    fn fetch_attendance(&self, group_id: &str) -> Result<AttendanceSnapshot, BackendError> {
        self.tick()?;
        let st = self.state.borrow();
        Ok(st.attendance.clone().unwrap_or_else(|| AttendanceSnapshot {
            group_id: group_id.to_string(),
            students: Vec::new(),
            sessions: Vec::new(),
            cells: Vec::new(),
        }))
    }

    fn bulk_update_attendance(
        &self,
        _group_id: &str,
        updates: &[AttendanceUpdate],
    ) -> Result<(), BackendError> {
        self.tick()?;
        let mut st = self.state.borrow_mut();
        if let Some(snapshot) = st.attendance.as_mut() {
            let mut order: Vec<&SessionColumn> = snapshot.sessions.iter().collect();
            order.sort_by(|a, b| {
                a.scheduled_at
                    .cmp(&b.scheduled_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            for u in updates {
                if order.get(u.session_index).map(|s| s.id.as_str()) != Some(u.session_id.as_str()) {
                    return Err(BackendError::Stale(u.session_id.clone()));
                }
            }
            for u in updates {
                snapshot
                    .cells
                    .retain(|c| !(c.student_id == u.student_id && c.session_id == u.session_id));
                snapshot.cells.push(AttendanceCell {
                    student_id: u.student_id.clone(),
                    session_id: u.session_id.clone(),
                    status: u.status,
                    activity_score: u.activity_score,
                });
            }
        }
        st.batches.push(updates.to_vec());
        Ok(())
    }
}
