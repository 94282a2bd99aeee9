//! Row snapshots and lookup helpers shared across handlers.

use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone)]
pub struct CourseRow {
    pub id: String,
    pub title: String,
    pub code: String,
    pub professor_id: String,
    pub schedule: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub fn course_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<CourseRow>> {
    conn.query_row(
        "SELECT id, title, code, professor_id, schedule, created_at, updated_at
         FROM courses WHERE id = ?",
        [id],
        |r| {
            Ok(CourseRow {
                id: r.get(0)?,
                title: r.get(1)?,
                code: r.get(2)?,
                professor_id: r.get(3)?,
                schedule: r.get(4)?,
                created_at: r.get(5)?,
                updated_at: r.get(6)?,
            })
        },
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: String,
    pub student_id: String,
    pub title: String,
    pub amount: f64,
    pub status: String,
    pub due_date: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub fn payment_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<PaymentRow>> {
    conn.query_row(
        "SELECT id, student_id, title, amount, status, due_date, created_at, updated_at
         FROM payments WHERE id = ?",
        [id],
        |r| {
            Ok(PaymentRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                title: r.get(2)?,
                amount: r.get(3)?,
                status: r.get(4)?,
                due_date: r.get(5)?,
                created_at: r.get(6)?,
                updated_at: r.get(7)?,
            })
        },
    )
    .optional()
}

/// Profile snapshot returned by the scan lookup.
#[derive(Debug, Clone)]
pub struct StudentSnapshot {
    pub id: String,
    pub full_name: String,
    pub major: Option<String>,
    pub level: Option<String>,
    pub payment_status: Option<String>,
    pub avatar_url: Option<String>,
}

/// Exact, case-sensitive match on the issued scan identifier.
pub fn student_by_scan_id(
    conn: &Connection,
    scan_id: &str,
) -> rusqlite::Result<Option<StudentSnapshot>> {
    conn.query_row(
        "SELECT id, full_name, major, level, payment_status, avatar_url
         FROM users WHERE role = 'STUDENT' AND scan_id = ?",
        [scan_id],
        |r| {
            Ok(StudentSnapshot {
                id: r.get(0)?,
                full_name: r.get(1)?,
                major: r.get(2)?,
                level: r.get(3)?,
                payment_status: r.get(4)?,
                avatar_url: r.get(5)?,
            })
        },
    )
    .optional()
}

pub fn student_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM users WHERE role = 'STUDENT' AND id = ?",
        [id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn user_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?", [id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn email_taken(
    conn: &Connection,
    email: &str,
    exclude_user: Option<&str>,
) -> rusqlite::Result<bool> {
    match exclude_user {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM users WHERE email = ? AND id != ?",
                (email, id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map(|v| v.is_some()),
        None => conn
            .query_row("SELECT 1 FROM users WHERE email = ?", [email], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map(|v| v.is_some()),
    }
}

pub fn user_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
}
