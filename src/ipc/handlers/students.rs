use crate::abilities;
use crate::auth::{self, AuthUser, Role};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    default_avatar, get_optional_str, get_required_text, now_rfc3339, require_conn, require_user,
    user_json,
};
use crate::ipc::types::{AppState, Request};
use crate::models;
use crate::notify::CredentialNotifier;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn list(conn: &Connection, actor: &AuthUser) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_students(actor) {
        return Err(HandlerErr::forbidden(
            "student directory requires ADMIN or DIRECTION_MEMBER role",
        ));
    }

    // Attendance rate is derived at read time; a student with no records
    // yet reports null rather than a misleading 0 or 100.
    let mut stmt = conn.prepare(
        "SELECT u.id, u.full_name, u.email, u.avatar_url, u.scan_id, u.payment_status,
                u.major, u.level, u.created_at,
                (SELECT COUNT(*) FROM attendances a WHERE a.student_id = u.id) AS total,
                (SELECT COUNT(*) FROM attendances a
                  WHERE a.student_id = u.id AND a.status = 'PRESENT') AS present
         FROM users u
         WHERE u.role = 'STUDENT'
         ORDER BY u.full_name",
    )?;
    let students = stmt
        .query_map([], |r| {
            let total: i64 = r.get(9)?;
            let present: i64 = r.get(10)?;
            let rate = if total > 0 {
                Some((present as f64 * 100.0 / total as f64 * 10.0).round() / 10.0)
            } else {
                None
            };
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "avatarUrl": r.get::<_, Option<String>>(3)?,
                "scanId": r.get::<_, Option<String>>(4)?,
                "paymentStatus": r.get::<_, Option<String>>(5)?,
                "major": r.get::<_, Option<String>>(6)?,
                "level": r.get::<_, Option<String>>(7)?,
                "createdAt": r.get::<_, String>(8)?,
                "attendanceRate": rate,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "students": students }))
}

fn create(
    conn: &Connection,
    actor: &AuthUser,
    notifier: &dyn CredentialNotifier,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_students(actor) {
        return Err(HandlerErr::forbidden(
            "creating students requires ADMIN or DIRECTION_MEMBER role",
        ));
    }

    let full_name = get_required_text(params, "fullName")?;
    let email = get_required_text(params, "email")?;
    let major = get_optional_str(params, "major")?;
    let level = get_optional_str(params, "level")?;

    if models::email_taken(conn, &email, None)? {
        return Err(HandlerErr::bad_params("email already in use"));
    }

    let (password, generated) = match get_optional_str(params, "password")? {
        Some(pw) if !pw.is_empty() => (pw, false),
        _ => (auth::generate_password(), true),
    };
    let password_hash =
        auth::hash_password(&password).map_err(|e| HandlerErr::db("internal", e, None))?;

    let student_id = Uuid::new_v4().to_string();
    // Issued exactly once; this is the QR payload for check-in.
    let scan_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO users(id, full_name, email, password_hash, role, avatar_url,
                           scan_id, payment_status, major, level, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &full_name,
            &email,
            &password_hash,
            Role::Student.as_str(),
            default_avatar(&full_name),
            &scan_id,
            "PENDING",
            &major,
            &level,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("users")))?;

    if generated {
        notifier.deliver(&email, &full_name, &password);
    }

    let student = auth::user_by_id(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": user_json(&student) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" | "students.create" => {}
        _ => return None,
    }

    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return Some(e.response(&req.id)),
    };
    let actor = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return Some(e.response(&req.id)),
    };

    let result = match req.method.as_str() {
        "students.list" => list(conn, &actor),
        _ => create(conn, &actor, state.notifier.as_ref(), &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
