use crate::abilities;
use crate::auth::AuthUser;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, now_rfc3339, require_conn, require_user};
use crate::ipc::types::{AppState, Request};
use crate::models;
use rusqlite::Connection;
use serde_json::json;

// Resolves a scanned QR payload to a student profile snapshot. A miss is a
// normal outcome: the response is still ok, with valid=false, so the scanner
// UI can keep scanning without error handling.
fn resolve(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::scan_student(actor) {
        return Err(HandlerErr::forbidden(
            "scanner access requires PROF or ADMIN role",
        ));
    }

    let scan_id = get_required_str(params, "scanId")?;
    let timestamp = now_rfc3339();

    match models::student_by_scan_id(conn, &scan_id)? {
        Some(student) => Ok(json!({
            "valid": true,
            "student": {
                "id": student.id,
                "name": student.full_name,
                "major": student.major,
                "level": student.level,
                "paymentStatus": student.payment_status,
                "avatarUrl": student.avatar_url,
            },
            "timestamp": timestamp,
        })),
        None => Ok(json!({
            "valid": false,
            "message": "unknown student or invalid code",
            "timestamp": timestamp,
        })),
    }
}

fn handle_scan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let actor = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    match resolve(conn, &actor, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scan.student" => Some(handle_scan(state, req)),
        _ => None,
    }
}
