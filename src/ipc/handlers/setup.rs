use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::settings::{
    self, AttendanceSettings, BuilderSettings, ATTENDANCE_SECTION_KEY, BUILDER_SECTION_KEY,
    LESSON_DURATION_RANGE, MAX_BATCH_EDITS_RANGE, MAX_TITLE_LENGTH_RANGE,
};
use log::info;
use serde_json::{json, Map, Value};
use std::ops::RangeInclusive;

#[derive(Clone, Copy)]
enum SetupSection {
    Builder,
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "builder" => Some(Self::Builder),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Builder => BUILDER_SECTION_KEY,
            Self::Attendance => ATTENDANCE_SECTION_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Builder => {
            let d = BuilderSettings::default();
            json!({
                "maxTitleLength": d.max_title_length,
                "defaultLessonDurationMinutes": d.default_lesson_duration_minutes
            })
        }
        SetupSection::Attendance => json!({
            "maxBatchEdits": AttendanceSettings::default().max_batch_edits
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, range: RangeInclusive<i64>) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !range.contains(&n) {
        return Err(format!(
            "{} must be in {}..={}",
            key,
            range.start(),
            range.end()
        ));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Builder => match k.as_str() {
                "maxTitleLength" => {
                    let n = parse_i64_range(v, k, MAX_TITLE_LENGTH_RANGE)?;
                    obj.insert(k.clone(), Value::from(n));
                }
                "defaultLessonDurationMinutes" => {
                    let n = parse_i64_range(v, k, LESSON_DURATION_RANGE)?;
                    obj.insert(k.clone(), Value::from(n));
                }
                _ => return Err(format!("unknown builder field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "maxBatchEdits" => {
                    let n = parse_i64_range(v, k, MAX_BATCH_EDITS_RANGE)?;
                    obj.insert(k.clone(), Value::from(n));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults instead of blocking setup.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let builder = match load_section(conn, SetupSection::Builder) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attendance = match load_section(conn, SetupSection::Attendance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "builder": builder,
            "attendance": attendance
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Open sessions pick the new limits up for their next edit.
    match section {
        SetupSection::Builder => {
            if let Some(session) = state.builder.as_mut() {
                session.set_settings(settings::load_builder_settings(conn));
            }
        }
        SetupSection::Attendance => {
            if let Some(matrix) = state.attendance.as_mut() {
                matrix.set_settings(&settings::load_attendance_settings(conn));
            }
        }
    }
    info!("setup section {} updated", section.key());
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
