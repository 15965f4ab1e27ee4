use crate::ipc::error::err;
use crate::ipc::types::Request;

pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

/// `Err` carries a ready `bad_params` response.
pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    match param_str(req, key).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing params.{}", key),
            None,
        )),
    }
}

pub fn parse_discard(req: &Request) -> bool {
    req.params
        .get("discard")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub fn unsaved_changes_err(req: &Request, what: &str, count: usize) -> serde_json::Value {
    err(
        &req.id,
        "unsaved_changes",
        format!("{} has {} unsaved changes; pass discard: true to drop them", what, count),
        Some(serde_json::json!({ "unsavedChanges": count })),
    )
}
