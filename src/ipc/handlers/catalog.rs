use crate::backend::SqliteBackend;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::sync::matrix::{format_timestamp, parse_timestamp};
use log::warn;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn row_exists(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, title, created_at) VALUES(?, ?, ?)",
        (&course_id, &title, db::now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }
    ok(&req.id, json!({ "courseId": course_id, "title": title }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.title,
           (SELECT COUNT(*) FROM course_modules m WHERE m.course_id = c.id) AS module_count
         FROM courses c
         ORDER BY c.created_at, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let module_count: i64 = row.get(2)?;
            Ok(json!({ "id": id, "title": title, "moduleCount": module_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if let Some(course_id) = course_id.as_deref() {
        match row_exists(conn, "courses", course_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "course not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO study_groups(id, course_id, name) VALUES(?, ?, ?)",
        (&group_id, &course_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "study_groups" })),
        );
    }
    ok(&req.id, json!({ "groupId": group_id, "name": name }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.name,
           g.course_id,
           (SELECT COUNT(*) FROM students s WHERE s.group_id = g.id) AS student_count,
           (SELECT COUNT(*) FROM lesson_sessions ls WHERE ls.group_id = g.id) AS session_count
         FROM study_groups g
         ORDER BY g.name, g.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let course_id: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let session_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "courseId": course_id,
                "studentCount": student_count,
                "sessionCount": session_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    match row_exists(conn, "study_groups", &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE group_id = ?",
        [&group_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, group_id, display_name, sort_order) VALUES(?, ?, ?, ?)",
        (&student_id, &group_id, &display_name, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "displayName": display_name, "sortOrder": sort_order }),
    )
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };
    let raw_when = match required_str(req, "scheduledAt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(scheduled_at) = parse_timestamp(raw_when) else {
        return err(
            &req.id,
            "bad_params",
            "scheduledAt must be RFC 3339 or YYYY-MM-DD",
            None,
        );
    };
    match row_exists(conn, "study_groups", &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Normalized so that text order is time order.
    let scheduled_at = format_timestamp(&scheduled_at);
    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lesson_sessions(id, group_id, title, scheduled_at) VALUES(?, ?, ?, ?)",
        (&session_id, &group_id, &title, &scheduled_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lesson_sessions" })),
        );
    }

    // An open grid on this group would otherwise save against shifted columns.
    let mut grid_refreshed = false;
    if let Some(matrix) = state.attendance.as_mut() {
        if matrix.group_id() == group_id {
            match matrix.reload(&SqliteBackend::new(conn)) {
                Ok(_) => grid_refreshed = true,
                Err(e) => warn!("attendance grid for {} not refreshed: {}", group_id, e),
            }
        }
    }
    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "title": title,
            "scheduledAt": scheduled_at,
            "gridRefreshed": grid_refreshed,
        }),
    )
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v.to_string(),
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, scheduled_at FROM lesson_sessions
         WHERE group_id = ?
         ORDER BY scheduled_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&group_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let scheduled_at: String = row.get(2)?;
            Ok(json!({ "id": id, "title": title, "scheduledAt": scheduled_at }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        _ => None,
    }
}
