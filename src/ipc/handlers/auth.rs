use crate::auth;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_conn, require_user, user_json};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

// Wrong email and wrong password must be indistinguishable to the caller.
fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;

    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((user_id, password_hash)) = found else {
        return Err(HandlerErr::unauthorized("invalid credentials"));
    };
    if !auth::verify_password(&password, &password_hash) {
        return Err(HandlerErr::unauthorized("invalid credentials"));
    }

    let (token, expires_at) = auth::create_session(conn, &user_id)
        .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("sessions")))?;
    let user = auth::user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::unauthorized("invalid credentials"))?;

    log::info!("session opened for {}", user.email);

    Ok(json!({
        "token": token,
        "expiresAt": expires_at,
        "user": user_json(&user)
    }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match login(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match require_user(conn, req) {
        Ok(user) => ok(&req.id, json!({ "user": user_json(&user) })),
        Err(error) => error.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let user = match require_user(conn, req) {
        Ok(u) => u,
        Err(error) => return error.response(&req.id),
    };
    let token = req.token.as_deref().unwrap_or_default();
    if let Err(e) = auth::drop_session(conn, token) {
        return HandlerErr::db("db_delete_failed", e, Some("sessions")).response(&req.id);
    }
    log::info!("session closed for {}", user.email);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.me" => Some(handle_me(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
