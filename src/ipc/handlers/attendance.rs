use crate::abilities;
use crate::auth::AuthUser;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_rfc3339, require_conn, require_user, today_utc,
};
use crate::ipc::types::{AppState, Request};
use crate::models;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ATTENDANCE_STATUSES: [&str; 2] = ["PRESENT", "ABSENT"];

fn attendance_json(conn: &Connection, id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, student_id, course_id, recorded_by, status, day, created_at, updated_at
             FROM attendances WHERE id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "courseId": r.get::<_, String>(2)?,
                    "recordedBy": r.get::<_, String>(3)?,
                    "status": r.get::<_, String>(4)?,
                    "day": r.get::<_, String>(5)?,
                    "createdAt": r.get::<_, String>(6)?,
                    "updatedAt": r.get::<_, Option<String>>(7)?,
                }))
            },
        )
        .optional()?;
    row.ok_or_else(|| HandlerErr::not_found("attendance record not found"))
}

/// Daily mark, idempotent per (student, course, UTC day).
///
/// The course is fetched before the ownership gate so a missing course reads
/// as not_found rather than a spurious denial. Repeated marks for the same
/// day converge on the last written status; a new day starts a new record.
fn mark(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    let status = get_optional_str(params, "status")?.unwrap_or_else(|| "PRESENT".to_string());
    if !ATTENDANCE_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params("status must be PRESENT or ABSENT"));
    }

    let Some(course) = models::course_by_id(conn, &course_id)? else {
        return Err(HandlerErr::not_found("course not found"));
    };
    if !abilities::mark_attendance(actor, &course) {
        return Err(HandlerErr::forbidden(
            "not the professor assigned to this course",
        ));
    }
    if !models::student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let day = today_utc();
    let now = now_rfc3339();

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendances
             WHERE student_id = ? AND course_id = ? AND day = ?",
            (&student_id, &course_id, &day),
            |r| r.get(0),
        )
        .optional()?;

    if let Some(attendance_id) = existing {
        conn.execute(
            "UPDATE attendances SET status = ?, recorded_by = ?, updated_at = ? WHERE id = ?",
            (&status, &actor.id, &now, &attendance_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e, Some("attendances")))?;

        return Ok(json!({
            "created": false,
            "message": "status updated",
            "attendance": attendance_json(conn, &attendance_id)?,
        }));
    }

    // The unique (student, course, day) constraint turns a concurrent
    // double-create into an update of the surviving row.
    let attendance_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendances(id, student_id, course_id, recorded_by, status, day,
                                 created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, day) DO UPDATE SET
           status = excluded.status,
           recorded_by = excluded.recorded_by,
           updated_at = excluded.updated_at",
        (
            &attendance_id,
            &student_id,
            &course_id,
            &actor.id,
            &status,
            &day,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("attendances")))?;

    // Re-read by the natural key: on conflict the stored id is the old one.
    let stored_id: String = conn.query_row(
        "SELECT id FROM attendances WHERE student_id = ? AND course_id = ? AND day = ?",
        (&student_id, &course_id, &day),
        |r| r.get(0),
    )?;

    Ok(json!({
        "created": true,
        "attendance": attendance_json(conn, &stored_id)?,
    }))
}

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let actor = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    match mark(conn, &actor, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_mark(state, req)),
        _ => None,
    }
}
