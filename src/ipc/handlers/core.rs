use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{default_avatar, get_required_text, now_rfc3339, require_conn};
use crate::ipc::types::{AppState, Request};
use crate::models;
use crate::auth::{self, Role};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let needs_setup = state
        .db
        .as_ref()
        .and_then(|conn| models::user_count(conn).ok())
        .map(|n| n == 0);
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "needsSetup": needs_setup
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            log::info!("opened school workspace at {}", path.display());
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

// First-run path: the very first account must exist before any authenticated
// method can run, so this one is open while the directory is empty and
// sealed forever after.
fn bootstrap(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let full_name = get_required_text(params, "fullName")?;
    let email = get_required_text(params, "email")?;
    let password = get_required_text(params, "password")?;

    if models::user_count(conn)? > 0 {
        return Err(HandlerErr::forbidden("setup already completed"));
    }

    let password_hash = auth::hash_password(&password)
        .map_err(|e| HandlerErr::db("internal", e, None))?;
    let user_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO users(id, full_name, email, password_hash, role, avatar_url, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &full_name,
            &email,
            &password_hash,
            Role::Admin.as_str(),
            default_avatar(&full_name),
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("users")))?;

    log::info!("bootstrap admin {} created", email);

    Ok(json!({
        "user": {
            "id": user_id,
            "fullName": full_name,
            "email": email,
            "role": Role::Admin.as_str(),
        }
    }))
}

fn handle_setup_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match bootstrap(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "setup.bootstrap" => Some(handle_setup_bootstrap(state, req)),
        _ => None,
    }
}
