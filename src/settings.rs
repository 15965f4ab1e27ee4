use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use std::ops::RangeInclusive;

use crate::db;

pub const BUILDER_SECTION_KEY: &str = "setup.builder";
pub const ATTENDANCE_SECTION_KEY: &str = "setup.attendance";

pub const MAX_TITLE_LENGTH_RANGE: RangeInclusive<i64> = 16..=500;
/// Bounds both the configured default and every lesson's own duration.
pub const LESSON_DURATION_RANGE: RangeInclusive<i64> = 5..=480;
pub const MAX_BATCH_EDITS_RANGE: RangeInclusive<i64> = 1..=20_000;

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderSettings {
    pub max_title_length: usize,
    pub default_lesson_duration_minutes: i64,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            max_title_length: 200,
            default_lesson_duration_minutes: 45,
        }
    }
}

impl BuilderSettings {
    pub fn from_section(obj: &Map<String, JsonValue>) -> Self {
        let defaults = Self::default();
        let max_title_length = obj
            .get("maxTitleLength")
            .and_then(|v| v.as_i64())
            .filter(|v| MAX_TITLE_LENGTH_RANGE.contains(v))
            .map(|v| v as usize)
            .unwrap_or(defaults.max_title_length);
        let default_lesson_duration_minutes = obj
            .get("defaultLessonDurationMinutes")
            .and_then(|v| v.as_i64())
            .filter(|v| LESSON_DURATION_RANGE.contains(v))
            .unwrap_or(defaults.default_lesson_duration_minutes);
        Self {
            max_title_length,
            default_lesson_duration_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceSettings {
    pub max_batch_edits: usize,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            max_batch_edits: 5000,
        }
    }
}

impl AttendanceSettings {
    pub fn from_section(obj: &Map<String, JsonValue>) -> Self {
        let max_batch_edits = obj
            .get("maxBatchEdits")
            .and_then(|v| v.as_i64())
            .filter(|v| MAX_BATCH_EDITS_RANGE.contains(v))
            .map(|v| v as usize)
            .unwrap_or(Self::default().max_batch_edits);
        Self { max_batch_edits }
    }
}

fn load_section(conn: &Connection, key: &str) -> Map<String, JsonValue> {
    // Malformed or unreadable sections fall back to defaults.
    db::settings_get_json(conn, key)
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

pub fn load_builder_settings(conn: &Connection) -> BuilderSettings {
    BuilderSettings::from_section(&load_section(conn, BUILDER_SECTION_KEY))
}

pub fn load_attendance_settings(conn: &Connection) -> AttendanceSettings {
    AttendanceSettings::from_section(&load_section(conn, ATTENDANCE_SECTION_KEY))
}
