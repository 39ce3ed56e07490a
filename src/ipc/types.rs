use std::path::PathBuf;

use serde::Deserialize;

use crate::access::Role;
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub session: Option<Session>,
    pub role: Role,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            session: None,
            role: Role::Anonymous,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
