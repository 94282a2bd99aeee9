use crate::abilities;
use crate::auth::{AuthUser, Role};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_str, get_required_text, now_rfc3339,
    require_conn, require_user,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{self, PaymentRow};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const PAYMENT_STATUSES: [&str; 3] = ["PENDING", "PAID", "LATE"];

fn check_status(raw: &str) -> Result<(), HandlerErr> {
    if PAYMENT_STATUSES.contains(&raw) {
        Ok(())
    } else {
        Err(HandlerErr::bad_params(format!(
            "status must be one of PENDING, PAID, LATE (got {})",
            raw
        )))
    }
}

fn check_amount(amount: f64) -> Result<(), HandlerErr> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(HandlerErr::bad_params("amount must be a positive number"))
    }
}

fn payment_json(p: &PaymentRow) -> serde_json::Value {
    json!({
        "id": p.id,
        "studentId": p.student_id,
        "title": p.title,
        "amount": p.amount,
        "status": p.status,
        "dueDate": p.due_date,
        "createdAt": p.created_at,
        "updatedAt": p.updated_at,
    })
}

fn list(conn: &Connection, actor: &AuthUser) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::view_payments(actor) {
        return Err(HandlerErr::forbidden("no access to payments"));
    }

    let payments = if actor.role == Role::Student {
        let mut stmt = conn.prepare(
            "SELECT id, student_id, title, amount, status, due_date, created_at, updated_at
             FROM payments WHERE student_id = ? ORDER BY due_date",
        )?;
        stmt.query_map([&actor.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "amount": r.get::<_, f64>(3)?,
                "status": r.get::<_, String>(4)?,
                "dueDate": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "updatedAt": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
    } else {
        // Administration view carries the student name for display.
        let mut stmt = conn.prepare(
            "SELECT p.id, p.student_id, p.title, p.amount, p.status, p.due_date,
                    p.created_at, p.updated_at, u.full_name
             FROM payments p
             JOIN users u ON u.id = p.student_id
             ORDER BY p.created_at DESC",
        )?;
        stmt.query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "amount": r.get::<_, f64>(3)?,
                "status": r.get::<_, String>(4)?,
                "dueDate": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "updatedAt": r.get::<_, Option<String>>(7)?,
                "studentName": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
    };

    Ok(json!({ "payments": payments }))
}

fn create(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_payments(actor) {
        return Err(HandlerErr::forbidden("reserved to the administration"));
    }

    let student_id = get_required_str(params, "studentId")?;
    let title = get_required_text(params, "title")?;
    let due_date = get_required_text(params, "dueDate")?;
    let amount = get_optional_f64(params, "amount")?
        .ok_or_else(|| HandlerErr::bad_params("missing amount"))?;
    check_amount(amount)?;
    let status = get_optional_str(params, "status")?.unwrap_or_else(|| "PENDING".to_string());
    check_status(&status)?;

    if !models::student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let payment_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO payments(id, student_id, title, amount, status, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &student_id,
            &title,
            amount,
            &status,
            &due_date,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, Some("payments")))?;

    let payment = models::payment_by_id(conn, &payment_id)?
        .ok_or_else(|| HandlerErr::not_found("payment not found"))?;
    Ok(json!({ "payment": payment_json(&payment) }))
}

// Status moves freely between PENDING/LATE/PAID; there is no enforced order.
fn update(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::manage_payments(actor) {
        return Err(HandlerErr::forbidden("reserved to the administration"));
    }

    let payment_id = get_required_str(params, "paymentId")?;
    let Some(payment) = models::payment_by_id(conn, &payment_id)? else {
        return Err(HandlerErr::not_found("payment not found"));
    };

    let title = match get_optional_str(params, "title")? {
        Some(t) if t.trim().is_empty() => {
            return Err(HandlerErr::bad_params("title must not be empty"))
        }
        Some(t) => t.trim().to_string(),
        None => payment.title.clone(),
    };
    let amount = match get_optional_f64(params, "amount")? {
        Some(a) => {
            check_amount(a)?;
            a
        }
        None => payment.amount,
    };
    let status = match get_optional_str(params, "status")? {
        Some(s) => {
            check_status(&s)?;
            s
        }
        None => payment.status.clone(),
    };
    let due_date = get_optional_str(params, "dueDate")?.unwrap_or(payment.due_date);

    conn.execute(
        "UPDATE payments SET title = ?, amount = ?, status = ?, due_date = ?, updated_at = ?
         WHERE id = ?",
        (&title, amount, &status, &due_date, now_rfc3339(), &payment_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e, Some("payments")))?;

    let payment = models::payment_by_id(conn, &payment_id)?
        .ok_or_else(|| HandlerErr::not_found("payment not found"))?;
    Ok(json!({ "payment": payment_json(&payment) }))
}

fn delete(
    conn: &Connection,
    actor: &AuthUser,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let Some(payment) = models::payment_by_id(conn, &payment_id)? else {
        return Err(HandlerErr::not_found("payment not found"));
    };

    // Granular check against THIS payment's state, not just the role.
    if !abilities::delete_payment(actor, &payment) {
        return Err(HandlerErr::forbidden(
            "only an admin can delete a settled (PAID) payment",
        ));
    }

    conn.execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e, Some("payments")))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.list" | "payments.create" | "payments.update" | "payments.delete" => {}
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
        "payments.list" => list(conn, &actor),
        "payments.create" => create(conn, &actor, &req.params),
        "payments.update" => update(conn, &actor, &req.params),
        _ => delete(conn, &actor, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
