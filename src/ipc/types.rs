use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::notify::CredentialNotifier;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Bearer-style session credential; required on everything except the
    /// core and login methods.
    #[serde(default)]
    pub token: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub notifier: Box<dyn CredentialNotifier>,
}
