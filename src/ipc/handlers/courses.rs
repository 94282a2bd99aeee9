use crate::abilities;
use crate::auth::{AuthUser, Role};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_text, now_rfc3339, require_conn,
    require_user,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{self, CourseRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn course_json(course: &CourseRow) -> serde_json::Value {
    json!({
        "id": course.id,
        "title": course.title,
        "code": course.code,
        "professorId": course.professor_id,
        "schedule": course.schedule,
        "createdAt": course.created_at,
        "updatedAt": course.updated_at,
    })
}

// Admin sees the whole catalog; everyone else only what they own.
fn list(conn: &Connection, actor: &AuthUser) -> Result<serde_json::Value, HandlerErr> {
    let (sql, scoped) = if actor.role == Role::Admin {
        (
            "SELECT id, title, code, professor_id, schedule, created_at, updated_at
             FROM courses ORDER BY title",
            false,
        )
    } else {
        (
            "SELECT id, title, code, professor_id, schedule, created_at, updated_at
             FROM courses WHERE professor_id = ? ORDER BY title",
            true,
        )
    };

    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "code": r.get::<_, String>(2)?,
            "professorId": r.get::<_, String>(3)?,
            "schedule": r.get::<_, String>(4)?,
            "createdAt": r.get::<_, String>(5)?,
            "updatedAt": r.get::<_, Option<String>>(6)?,
        }))
    };
    let courses = if scoped {
        stmt.query_map([&actor.id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
    };

    Ok(json!({ "courses": courses }))
}

fn create(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::create_course(actor) {
        return Err(HandlerErr::forbidden("creating courses requires ADMIN or PROF role"));
    }

    let title = get_required_text(params, "title")?;
    let code = get_required_text(params, "code")?;
    let schedule = get_required_text(params, "schedule")?;

    // A professor owns what they create; an admin must name the owner, and
    // the owner must actually be a professor.
    let professor_id = match get_optional_str(params, "professorId")? {
        Some(id) => {
            let role: Option<String> = conn
                .query_row("SELECT role FROM users WHERE id = ?", [&id], |r| r.get(0))
                .optional()?;
            match role.as_deref() {
                Some("PROF") => id,
                _ => {
                    return Err(HandlerErr::bad_params(
                        "professorId must reference an existing professor",
                    ))
                }
            }
        }
        None if actor.role == Role::Prof => actor.id.clone(),
        None => {
            return Err(HandlerErr::bad_params(
                "professorId is required when not creating as a professor",
            ))
        }
    };

    let course_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO courses(id, title, code, professor_id, schedule, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&course_id, &title, &code, &professor_id, &schedule, &now),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("courses")))?;

    let course = models::course_by_id(conn, &course_id)?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "course": course_json(&course) }))
}

fn update(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let Some(course) = models::course_by_id(conn, &course_id)? else {
        return Err(HandlerErr::not_found("course not found"));
    };
    if !abilities::edit_course(actor, &course) {
        return Err(HandlerErr::forbidden("not the professor assigned to this course"));
    }

    let title = match get_optional_str(params, "title")? {
        Some(t) if t.trim().is_empty() => {
            return Err(HandlerErr::bad_params("title must not be empty"))
        }
        Some(t) => t.trim().to_string(),
        None => course.title.clone(),
    };
    let code = match get_optional_str(params, "code")? {
        Some(c) if c.trim().is_empty() => {
            return Err(HandlerErr::bad_params("code must not be empty"))
        }
        Some(c) => c.trim().to_string(),
        None => course.code.clone(),
    };
    let schedule = match get_optional_str(params, "schedule")? {
        Some(s) if s.trim().is_empty() => {
            return Err(HandlerErr::bad_params("schedule must not be empty"))
        }
        Some(s) => s.trim().to_string(),
        None => course.schedule.clone(),
    };

    conn.execute(
        "UPDATE courses SET title = ?, code = ?, schedule = ?, updated_at = ? WHERE id = ?",
        (&title, &code, &schedule, now_rfc3339(), &course_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e, Some("courses")))?;

    let course = models::course_by_id(conn, &course_id)?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "course": course_json(&course) }))
}

fn delete(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let Some(course) = models::course_by_id(conn, &course_id)? else {
        return Err(HandlerErr::not_found("course not found"));
    };
    if !abilities::edit_course(actor, &course) {
        return Err(HandlerErr::forbidden("not the professor assigned to this course"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e, None))?;
    tx.execute("DELETE FROM attendances WHERE course_id = ?", [&course_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("attendances")))?;
    tx.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("courses")))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e, None))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" | "courses.create" | "courses.update" | "courses.delete" => {}
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
        "courses.list" => list(conn, &actor),
        "courses.create" => create(conn, &actor, &req.params),
        "courses.update" => update(conn, &actor, &req.params),
        _ => delete(conn, &actor, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
