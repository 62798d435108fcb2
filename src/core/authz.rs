//! Roles and the authorization guards every state transition runs first.

use crate::core::error::TechPathError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Mentor => "MENTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TechPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(Role::Student),
            "MENTOR" => Ok(Role::Mentor),
            "ADMIN" => Ok(Role::Admin),
            other => Err(TechPathError::ValidationError(format!(
                "Unknown role '{}'. Valid: STUDENT, MENTOR, ADMIN",
                other
            ))),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TechPathError| FromSqlError::Other(Box::new(e)))
    }
}

/// Fail with `Unauthorized` unless `role` is one of `allowed`.
pub fn ensure_role(
    actor_id: &str,
    role: Role,
    allowed: &[Role],
    op: &str,
) -> Result<(), TechPathError> {
    if allowed.contains(&role) {
        return Ok(());
    }
    let wanted: Vec<&str> = allowed.iter().map(|r| r.as_str()).collect();
    Err(TechPathError::Unauthorized(format!(
        "{} requires role {}; user '{}' is {}",
        op,
        wanted.join(" or "),
        actor_id,
        role
    )))
}

pub fn ensure_student(actor_id: &str, role: Role, op: &str) -> Result<(), TechPathError> {
    ensure_role(actor_id, role, &[Role::Student], op)
}

pub fn ensure_mentor(actor_id: &str, role: Role, op: &str) -> Result<(), TechPathError> {
    ensure_role(actor_id, role, &[Role::Mentor], op)
}

/// Mentors and administrators may review and see review queues.
pub fn ensure_reviewer(actor_id: &str, role: Role, op: &str) -> Result<(), TechPathError> {
    ensure_role(actor_id, role, &[Role::Mentor, Role::Admin], op)
}

/// A mentor may only act on students assigned to them; administrators act on anyone.
pub fn ensure_assigned_reviewer(
    actor_id: &str,
    role: Role,
    student_mentor_id: Option<&str>,
    op: &str,
) -> Result<(), TechPathError> {
    ensure_reviewer(actor_id, role, op)?;
    if role == Role::Admin || student_mentor_id == Some(actor_id) {
        return Ok(());
    }
    Err(TechPathError::Forbidden(format!(
        "{}: mentor '{}' is not assigned to this student",
        op, actor_id
    )))
}
