use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::auth::{self, AuthUser};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Resolves the request's bearer token to its user, or fails with
/// `unauthorized` before the handler body runs.
pub fn require_user(conn: &Connection, req: &Request) -> Result<AuthUser, HandlerErr> {
    let token = req
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HandlerErr::unauthorized("authentication required"))?;
    match auth::user_for_token(conn, token)? {
        Some(user) => Ok(user),
        None => Err(HandlerErr::unauthorized("invalid or expired session")),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Like `get_required_str` but also rejects blank values.
pub fn get_required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let value = get_required_str(params, key)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(trimmed.to_string())
}

/// Absent or null means "not provided"; any other non-string is a caller bug.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_f64(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// The attendance dedup key: the current UTC calendar date, `YYYY-MM-DD`.
pub fn today_utc() -> String {
    Utc::now().date_naive().to_string()
}

pub fn default_avatar(full_name: &str) -> String {
    format!(
        "https://ui-avatars.com/api/?name={}&background=random",
        full_name.trim().replace(' ', "+")
    )
}

pub fn user_json(user: &AuthUser) -> serde_json::Value {
    json!({
        "id": user.id,
        "fullName": user.full_name,
        "email": user.email,
        "role": user.role.as_str(),
        "avatarUrl": user.avatar_url,
        "scanId": user.scan_id,
        "paymentStatus": user.payment_status,
        "major": user.major,
        "level": user.level,
        "createdAt": user.created_at,
        "updatedAt": user.updated_at,
    })
}
