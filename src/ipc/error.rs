use serde_json::json;

use crate::sync::SyncError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps an editing-core failure onto the wire error shape.
pub fn sync_err(id: &str, e: &SyncError) -> serde_json::Value {
    let mut details = json!({ "retryable": e.is_retryable() });
    match e {
        SyncError::Validation { field, .. } => {
            details["field"] = json!(field);
        }
        SyncError::StaleReference(entity) | SyncError::NotEditable(entity) => {
            details["id"] = json!(entity);
        }
        SyncError::BatchTooLarge { count, limit } => {
            details["count"] = json!(count);
            details["limit"] = json!(limit);
        }
        _ => {}
    }
    if let Some(cause) = e.backend_cause() {
        details["cause"] = json!({ "code": cause.code(), "message": cause.to_string() });
    }
    err(id, e.code(), e.to_string(), Some(details))
}
