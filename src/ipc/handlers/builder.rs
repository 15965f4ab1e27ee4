use crate::backend::SqliteBackend;
use crate::ipc::error::{err, ok, sync_err};
use crate::ipc::helpers::{parse_discard, required_str, unsaved_changes_err};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use crate::sync::entity::{EntityId, Scope};
use crate::sync::session::{Edit, EditSession};
use crate::sync::tracker::Deletion;
use log::info;
use serde_json::json;

fn no_session(req: &Request) -> serde_json::Value {
    err(&req.id, "no_session", "open a builder scope first", None)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw_scope) = req.params.get("scope") else {
        return err(&req.id, "bad_params", "missing params.scope", None);
    };
    let scope: Scope = match serde_json::from_value(raw_scope.clone()) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bad_params", format!("invalid scope: {}", e), None),
    };

    if let Some(session) = state.builder.as_ref() {
        let switching = session.scope() != Some(&scope);
        if switching && session.has_unsaved_changes() && !parse_discard(req) {
            return unsaved_changes_err(req, "the open builder scope", session.unsaved_changes());
        }
    }

    let session = state
        .builder
        .get_or_insert_with(|| EditSession::new(settings::load_builder_settings(conn)));
    let backend = SqliteBackend::new(conn);
    if let Err(e) = session.load(&scope, &backend) {
        return sync_err(&req.id, &e);
    }
    info!("builder opened on {}", scope);
    ok(&req.id, session.to_json())
}

fn handle_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.builder.as_ref() {
        Some(session) => ok(&req.id, session.to_json()),
        None => no_session(req),
    }
}

fn handle_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    match session.reload(&SqliteBackend::new(conn)) {
        Ok(()) => ok(&req.id, session.to_json()),
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_edit_field(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    let id = match required_str(req, "id") {
        Ok(v) => EntityId::parse(v),
        Err(resp) => return resp,
    };
    let field = match required_str(req, "field") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let Some(value) = req.params.get("value").cloned() else {
        return err(&req.id, "bad_params", "missing params.value", None);
    };
    match session.apply(Edit::SetField { id, field, value }) {
        Ok(_) => ok(&req.id, session.to_json()),
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_add_draft(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    let Some(fields) = req.params.get("fields").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "fields must be an object", None);
    };
    match session.apply(Edit::AddDraft {
        fields: fields.clone(),
    }) {
        Ok(temp_id) => ok(
            &req.id,
            json!({ "tempId": temp_id, "view": session.to_json() }),
        ),
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    let id = match required_str(req, "id") {
        Ok(v) => EntityId::parse(v),
        Err(resp) => return resp,
    };
    match session.delete(&id, &SqliteBackend::new(conn)) {
        Ok(outcome) => {
            let deleted = match outcome {
                Deletion::Forgotten => "draft",
                Deletion::Remote(_) => "remote",
            };
            // Set when the delete went through but the refresh after it did not.
            let load_error = session
                .load_error()
                .map(|m| json!({ "message": m, "retryable": true }));
            ok(
                &req.id,
                json!({ "deleted": deleted, "loadError": load_error, "view": session.to_json() }),
            )
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    let Some(raw_ids) = req.params.get("ids").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "ids must be an array", None);
    };
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        let Some(s) = raw.as_str() else {
            return err(&req.id, "bad_params", "ids must be strings", None);
        };
        ids.push(EntityId::parse(s));
    }
    match session.apply(Edit::Reorder { ids }) {
        Ok(_) => ok(&req.id, session.to_json()),
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.builder.as_mut() else {
        return no_session(req);
    };
    match session.commit(&SqliteBackend::new(conn)) {
        Ok(report) => {
            let created: Vec<serde_json::Value> = report
                .created
                .iter()
                .map(|(temp_id, id)| json!({ "tempId": temp_id, "id": id }))
                .collect();
            ok(
                &req.id,
                json!({
                    "created": created,
                    "updated": report.updated,
                    "reordered": report.reordered,
                    "view": session.to_json(),
                }),
            )
        }
        Err(e) => sync_err(&req.id, &e),
    }
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.builder.as_ref() else {
        return ok(&req.id, json!({ "closed": false }));
    };
    if session.has_unsaved_changes() && !parse_discard(req) {
        return unsaved_changes_err(req, "the builder", session.unsaved_changes());
    }
    if let Some(scope) = session.scope() {
        info!("builder closed on {}", scope);
    }
    state.builder = None;
    ok(&req.id, json!({ "closed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "builder.open" => Some(handle_open(state, req)),
        "builder.view" => Some(handle_view(state, req)),
        "builder.reload" => Some(handle_reload(state, req)),
        "builder.editField" => Some(handle_edit_field(state, req)),
        "builder.addDraft" => Some(handle_add_draft(state, req)),
        "builder.delete" => Some(handle_delete(state, req)),
        "builder.reorder" => Some(handle_reorder(state, req)),
        "builder.commit" => Some(handle_commit(state, req)),
        "builder.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
