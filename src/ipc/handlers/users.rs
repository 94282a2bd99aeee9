use crate::abilities;
use crate::auth::{self, AuthUser, Role};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    default_avatar, get_optional_str, get_required_str, get_required_text, now_rfc3339,
    require_conn, require_user, user_json,
};
use crate::ipc::types::{AppState, Request};
use crate::models;
use crate::notify::CredentialNotifier;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn list(conn: &Connection, actor: &AuthUser) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_users(actor) {
        return Err(HandlerErr::forbidden("reserved to administrators"));
    }

    let mut stmt = conn.prepare(
        "SELECT id, full_name, email, role, avatar_url, scan_id, payment_status,
                major, level, created_at, updated_at
         FROM users
         ORDER BY created_at DESC",
    )?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "avatarUrl": r.get::<_, Option<String>>(4)?,
                "scanId": r.get::<_, Option<String>>(5)?,
                "paymentStatus": r.get::<_, Option<String>>(6)?,
                "major": r.get::<_, Option<String>>(7)?,
                "level": r.get::<_, Option<String>>(8)?,
                "createdAt": r.get::<_, String>(9)?,
                "updatedAt": r.get::<_, Option<String>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "users": users }))
}

fn create(
    conn: &Connection,
    actor: &AuthUser,
    notifier: &dyn CredentialNotifier,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_users(actor) {
        return Err(HandlerErr::forbidden("reserved to administrators"));
    }

    let full_name = get_required_text(params, "fullName")?;
    let email = get_required_text(params, "email")?;
    let role_raw = get_required_str(params, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", role_raw)))?;

    if models::email_taken(conn, &email, None)? {
        return Err(HandlerErr::bad_params("email already in use"));
    }

    // An explicit initial password may be supplied; otherwise one is
    // generated and delivered out of band.
    let (password, generated) = match get_optional_str(params, "password")? {
        Some(pw) if !pw.is_empty() => (pw, false),
        _ => (auth::generate_password(), true),
    };
    let password_hash =
        auth::hash_password(&password).map_err(|e| HandlerErr::db("internal", e, None))?;

    let avatar_url = get_optional_str(params, "avatarUrl")?
        .unwrap_or_else(|| default_avatar(&full_name));

    // Accounts created as students get their scan identifier issued here,
    // same as through students.create.
    let (scan_id, payment_status) = if role == Role::Student {
        (
            Some(Uuid::new_v4().to_string()),
            Some("PENDING".to_string()),
        )
    } else {
        (None, None)
    };

    let user_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO users(id, full_name, email, password_hash, role, avatar_url,
                           scan_id, payment_status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &full_name,
            &email,
            &password_hash,
            role.as_str(),
            &avatar_url,
            &scan_id,
            &payment_status,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("users")))?;

    if generated {
        notifier.deliver(&email, &full_name, &password);
    }

    let user = auth::user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::not_found("user not found"))?;
    Ok(json!({ "user": user_json(&user) }))
}

fn update(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_users(actor) {
        return Err(HandlerErr::forbidden("reserved to administrators"));
    }

    let user_id = get_required_str(params, "userId")?;
    let Some(existing) = auth::user_by_id(conn, &user_id)? else {
        return Err(HandlerErr::not_found("user not found"));
    };

    let full_name = get_optional_str(params, "fullName")?.unwrap_or(existing.full_name);
    let email = match get_optional_str(params, "email")? {
        Some(new_email) if new_email != existing.email => {
            if models::email_taken(conn, &new_email, Some(&user_id))? {
                return Err(HandlerErr::bad_params("email already in use"));
            }
            new_email
        }
        Some(same) => same,
        None => existing.email,
    };
    let role = match get_optional_str(params, "role")? {
        Some(raw) => Role::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", raw)))?,
        None => existing.role,
    };
    let avatar_url = get_optional_str(params, "avatarUrl")?.or(existing.avatar_url);

    conn.execute(
        "UPDATE users SET full_name = ?, email = ?, role = ?, avatar_url = ?, updated_at = ?
         WHERE id = ?",
        (
            &full_name,
            &email,
            role.as_str(),
            &avatar_url,
            now_rfc3339(),
            &user_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e, Some("users")))?;

    let user = auth::user_by_id(conn, &user_id)?
        .ok_or_else(|| HandlerErr::not_found("user not found"))?;
    Ok(json!({ "user": user_json(&user) }))
}

fn delete(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_users(actor) {
        return Err(HandlerErr::forbidden("reserved to administrators"));
    }

    let user_id = get_required_str(params, "userId")?;
    if !models::user_exists(conn, &user_id)? {
        return Err(HandlerErr::not_found("user not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e, None))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("sessions")))?;
    tx.execute(
        "DELETE FROM attendances WHERE student_id = ? OR recorded_by = ?",
        (&user_id, &user_id),
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("attendances")))?;
    tx.execute(
        "DELETE FROM attendances
         WHERE course_id IN (SELECT id FROM courses WHERE professor_id = ?)",
        [&user_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("attendances")))?;
    tx.execute("DELETE FROM payments WHERE student_id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("payments")))?;
    tx.execute("DELETE FROM courses WHERE professor_id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("courses")))?;
    tx.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("users")))?;

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e, None))?;

    Ok(json!({ "ok": true }))
}

fn with_actor(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &AuthUser) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let actor = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    match f(conn, &actor) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(with_actor(state, req, |conn, actor| list(conn, actor))),
        "users.create" => {
            let conn = match require_conn(state) {
                Ok(c) => c,
                Err(e) => return Some(e.response(&req.id)),
            };
            let actor = match require_user(conn, req) {
                Ok(u) => u,
                Err(e) => return Some(e.response(&req.id)),
            };
            Some(
                match create(conn, &actor, state.notifier.as_ref(), &req.params) {
                    Ok(result) => ok(&req.id, result),
                    Err(error) => error.response(&req.id),
                },
            )
        }
        "users.update" => Some(with_actor(state, req, |conn, actor| {
            update(conn, actor, &req.params)
        })),
        "users.delete" => Some(with_actor(state, req, |conn, actor| {
            delete(conn, actor, &req.params)
        })),
        _ => None,
    }
}
