//! Named authorization predicates, one per guarded action.
//!
//! Each predicate takes the acting user (and the target row where ownership
//! or state matters) and answers permit/deny. Handlers compose these
//! explicitly; a denial always surfaces as a `forbidden` error, distinct
//! from `not_found` and `bad_params`.

use crate::auth::{AuthUser, Role};
use crate::models::{CourseRow, PaymentRow};

pub fn manage_users(user: &AuthUser) -> bool {
    user.role == Role::Admin
}

pub fn manage_students(user: &AuthUser) -> bool {
    matches!(user.role, Role::Admin | Role::DirectionMember)
}

pub fn view_finance_stats(user: &AuthUser) -> bool {
    matches!(user.role, Role::Admin | Role::DirectionMember)
}

pub fn manage_payments(user: &AuthUser) -> bool {
    matches!(user.role, Role::Admin | Role::DirectionMember)
}

/// Deleting a settled payment would break the audit trail, so PAID rows are
/// reserved to admins.
pub fn delete_payment(user: &AuthUser, payment: &PaymentRow) -> bool {
    match user.role {
        Role::Admin => true,
        Role::DirectionMember => payment.status != "PAID",
        _ => false,
    }
}

pub fn view_payments(user: &AuthUser) -> bool {
    matches!(
        user.role,
        Role::Admin | Role::DirectionMember | Role::Student
    )
}

pub fn create_course(user: &AuthUser) -> bool {
    matches!(user.role, Role::Admin | Role::Prof)
}

pub fn edit_course(user: &AuthUser, course: &CourseRow) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Prof => user.id == course.professor_id,
        _ => false,
    }
}

/// Coarse gate on the scanner feature itself, checked before any course is
/// selected. Does not grant the right to record a presence.
pub fn scan_student(user: &AuthUser) -> bool {
    matches!(user.role, Role::Admin | Role::Prof)
}

/// Strict gate for recording attendance against one specific course.
pub fn mark_attendance(user: &AuthUser, course: &CourseRow) -> bool {
    match user.role {
        Role::Admin => true,
        Role::Prof => user.id == course.professor_id,
        _ => false,
    }
}
