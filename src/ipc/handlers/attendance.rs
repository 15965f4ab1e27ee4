use crate::backend::SqliteBackend;
use crate::ipc::error::{err, ok, sync_err};
use crate::ipc::helpers::{parse_discard, required_str, unsaved_changes_err};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use crate::sync::matrix::{MatrixEdit, StatusMatrix};
use chrono::Utc;
use log::info;
use serde_json::json;

fn no_session(req: &Request) -> serde_json::Value {
    err(&req.id, "no_session", "open an attendance group first", None)
}

/// `(studentId, sessionId)` from params; `Err` is a ready response.
fn cell_params(req: &Request) -> Result<(String, String), serde_json::Value> {
    let student_id = required_str(req, "studentId")?.to_string();
    let session_id = required_str(req, "sessionId")?.to_string();
    Ok((student_id, session_id))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    if let Some(matrix) = state.attendance.as_ref() {
        if matrix.unsaved_changes() > 0 && !parse_discard(req) {
            return unsaved_changes_err(req, "the open attendance grid", matrix.unsaved_changes());
        }
    }

    let settings = settings::load_attendance_settings(conn);
    match StatusMatrix::load(&group_id, &SqliteBackend::new(conn), &settings) {
        Ok(matrix) => {
            info!("attendance opened for group {}", group_id);
            let view = matrix.to_json(Utc::now());
            state.attendance = Some(matrix);
            ok(&req.id, view)
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.attendance.as_ref() {
        Some(matrix) => ok(&req.id, matrix.to_json(Utc::now())),
        None => no_session(req),
    }
}

/// Refreshes the grid from storage; unsaved cells ride along.
fn handle_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(matrix) = state.attendance.as_mut() else {
        return no_session(req);
    };
    match matrix.reload(&SqliteBackend::new(conn)) {
        Ok(dropped) => {
            let mut view = matrix.to_json(Utc::now());
            view["droppedChanges"] = json!(dropped);
            ok(&req.id, view)
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(matrix) = state.attendance.as_mut() else {
        return no_session(req);
    };
    let (student_id, session_id) = match cell_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let edit = MatrixEdit::Toggle {
        student_id: student_id.clone(),
        session_id: session_id.clone(),
    };
    match matrix.apply(edit, Utc::now()) {
        Ok(changed) => {
            let cell = matrix.cell(&student_id, &session_id);
            ok(
                &req.id,
                json!({
                    "changed": changed,
                    "status": cell.status.as_str(),
                    "activityScore": cell.activity_score,
                    "unsavedChanges": matrix.unsaved_changes(),
                }),
            )
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_set_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(matrix) = state.attendance.as_mut() else {
        return no_session(req);
    };
    let (student_id, session_id) = match cell_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let score = match req.params.get("score") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => {
                return err(
                    &req.id,
                    "validation_failed",
                    "activityScore must be an integer or null",
                    Some(json!({ "field": "activityScore", "retryable": false })),
                )
            }
        },
    };
    let edit = MatrixEdit::SetScore {
        student_id: student_id.clone(),
        session_id: session_id.clone(),
        score,
    };
    match matrix.apply(edit, Utc::now()) {
        Ok(_) => {
            let cell = matrix.cell(&student_id, &session_id);
            ok(
                &req.id,
                json!({
                    "status": cell.status.as_str(),
                    "activityScore": cell.activity_score,
                    "unsavedChanges": matrix.unsaved_changes(),
                }),
            )
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(matrix) = state.attendance.as_mut() else {
        return no_session(req);
    };
    match matrix.save_all(&SqliteBackend::new(conn)) {
        Ok(saved) => ok(
            &req.id,
            json!({ "saved": saved, "unsavedChanges": matrix.unsaved_changes() }),
        ),
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(matrix) = state.attendance.as_ref() else {
        return no_session(req);
    };
    let students: Vec<serde_json::Value> = matrix
        .summary(Utc::now())
        .iter()
        .map(|s| s.to_json())
        .collect();
    ok(
        &req.id,
        json!({ "groupId": matrix.group_id(), "students": students }),
    )
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(matrix) = state.attendance.as_ref() else {
        return ok(&req.id, json!({ "closed": false }));
    };
    if matrix.unsaved_changes() > 0 && !parse_discard(req) {
        return unsaved_changes_err(req, "the attendance grid", matrix.unsaved_changes());
    }
    info!("attendance closed for group {}", matrix.group_id());
    state.attendance = None;
    ok(&req.id, json!({ "closed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.open" => Some(handle_open(state, req)),
        "attendance.view" => Some(handle_view(state, req)),
        "attendance.reload" => Some(handle_reload(state, req)),
        "attendance.toggle" => Some(handle_toggle(state, req)),
        "attendance.setScore" => Some(handle_set_score(state, req)),
        "attendance.save" => Some(handle_save(state, req)),
        "attendance.summary" => Some(handle_summary(state, req)),
        "attendance.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
