use crate::abilities;
use crate::auth::AuthUser;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{require_conn, require_user};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Utc};
use rusqlite::Connection;
use serde_json::json;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const WINDOW_MONTHS: i32 = 6;

fn months_back(year: i32, month: u32, back: i32) -> (i32, u32) {
    let total = year * 12 + month as i32 - 1 - back;
    (total.div_euclid(12), (total.rem_euclid(12) + 1) as u32)
}

// Dashboard series for the direction: one point per month over the trailing
// window, oldest first. Revenue counts settled payments by due month;
// attendance is the share of PRESENT marks among that month's records.
fn direction(conn: &Connection, actor: &AuthUser) -> Result<serde_json::Value, HandlerErr> {
    if !abilities::view_finance_stats(actor) {
        return Err(HandlerErr::forbidden(
            "reserved to the direction and administrators",
        ));
    }

    let today = Utc::now().date_naive();
    let mut stats = Vec::with_capacity(WINDOW_MONTHS as usize);
    for back in (0..WINDOW_MONTHS).rev() {
        let (year, month) = months_back(today.year(), today.month(), back);
        let month_key = format!("{:04}-{:02}", year, month);

        let revenue: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0)
             FROM payments WHERE status = 'PAID' AND substr(due_date, 1, 7) = ?",
            [&month_key],
            |r| r.get(0),
        )?;
        let (total, present): (i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'PRESENT' THEN 1 ELSE 0 END), 0)
             FROM attendances WHERE substr(day, 1, 7) = ?",
            [&month_key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let attendance = if total > 0 {
            (present * 100 + total / 2) / total
        } else {
            0
        };

        stats.push(json!({
            "name": MONTH_NAMES[(month - 1) as usize],
            "revenue": revenue,
            "attendance": attendance,
        }));
    }

    Ok(json!({ "stats": stats }))
}

fn handle_direction(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let actor = match require_user(conn, req) {
        Ok(u) => u,
        Err(e) => return e.response(&req.id),
    };
    match direction(conn, &actor) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.direction" => Some(handle_direction(state, req)),
        _ => None,
    }
}
