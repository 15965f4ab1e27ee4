use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::sync::matrix::StatusMatrix;
use crate::sync::session::EditSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Course-builder session; at most one scope is edited at a time.
    pub builder: Option<EditSession>,
    pub attendance: Option<StatusMatrix>,
}
