use crate::core::authz::Role;
use crate::core::broker::Broker;
use crate::core::error;
use crate::core::output;
use crate::core::pool;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Roster back-reference: the mentor this student is assigned to.
    pub mentor_id: Option<String>,
    pub created_at: String,
}

pub(crate) const USER_COLUMNS: &str = "id, username, email, role, mentor_id, created_at";

impl User {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            mentor_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "user", about = "Register and look up students, mentors, and administrators.")]
pub struct UserCli {
    #[clap(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user.
    Add {
        #[clap(long)]
        username: String,
        #[clap(long)]
        email: String,
        /// STUDENT, MENTOR, or ADMIN
        #[clap(long, default_value = "STUDENT")]
        role: Role,
    },
    /// List users, optionally filtered by role.
    List {
        #[clap(long)]
        role: Option<Role>,
    },
    /// Show one user by id or username.
    Show {
        #[clap(long)]
        id: String,
    },
}

// --- Storage ---

pub fn initialize_users_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "users.init", |conn| {
        conn.execute_batch(schemas::USERS_DB_SCHEMA)?;
        Ok(())
    })
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
    })
}

pub fn create_user(
    store: &Store,
    username: &str,
    email: &str,
    role: Role,
) -> Result<User, error::TechPathError> {
    let username = username.trim();
    let email = email.trim().to_lowercase();
    if username.is_empty() {
        return Err(error::TechPathError::ValidationError(
            "username must not be empty".to_string(),
        ));
    }
    if !email_pattern().is_match(&email) {
        return Err(error::TechPathError::ValidationError(format!(
            "'{}' is not a valid email address",
            email
        )));
    }

    let user = User {
        id: time::new_id("U"),
        username: username.to_string(),
        email,
        role,
        mentor_id: None,
        created_at: time::now_epoch_z(),
    };

    store.broker().write(&user.id, "users.create", |conn| {
        conn.execute(
            "INSERT INTO users(id, username, email, role, mentor_id, created_at)
             VALUES(?1, ?2, ?3, ?4, NULL, ?5)",
            params![user.id, user.username, user.email, user.role, user.created_at],
        )
        .map_err(|e| {
            if pool::is_constraint_violation(&e) {
                error::TechPathError::Conflict(format!(
                    "username '{}' or email '{}' is already registered",
                    user.username, user.email
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    })?;

    info!(user = %user.id, role = %user.role, "user registered");
    Ok(user)
}

/// Load a user inside an open connection or transaction.
pub(crate) fn load_user(conn: &Connection, user_id: &str) -> Result<User, error::TechPathError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        User::from_row,
    )
    .optional()?
    .ok_or_else(|| error::TechPathError::NotFound(format!("User '{}' not found", user_id)))
}

/// Assign or clear a student's mentor.
pub(crate) fn set_mentor(
    conn: &Connection,
    student_id: &str,
    mentor_id: Option<&str>,
) -> Result<(), error::TechPathError> {
    conn.execute(
        "UPDATE users SET mentor_id = ?1 WHERE id = ?2",
        params![mentor_id, student_id],
    )?;
    Ok(())
}

pub fn get_user(store: &Store, user_id: &str) -> Result<User, error::TechPathError> {
    store.broker().read(|conn| load_user(conn, user_id))
}

pub fn find_by_username(
    store: &Store,
    username: &str,
) -> Result<Option<User>, error::TechPathError> {
    store.broker().read(|conn| {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username.trim()],
                User::from_row,
            )
            .optional()?)
    })
}

/// Resolve either a user id or a username.
pub fn resolve_user(store: &Store, id_or_username: &str) -> Result<User, error::TechPathError> {
    match get_user(store, id_or_username) {
        Err(error::TechPathError::NotFound(_)) => find_by_username(store, id_or_username)?
            .ok_or_else(|| {
                error::TechPathError::NotFound(format!("User '{}' not found", id_or_username))
            }),
        other => other,
    }
}

pub fn list_users(store: &Store, role: Option<Role>) -> Result<Vec<User>, error::TechPathError> {
    store.broker().read(|conn| {
        let users = match role {
            Some(role) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM users WHERE role = ?1 ORDER BY username",
                    USER_COLUMNS
                ))?;
                stmt.query_map(params![role], User::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM users ORDER BY username",
                    USER_COLUMNS
                ))?;
                stmt.query_map([], User::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(users)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "users",
        "version": "0.1.0",
        "description": "User directory with closed roles and the roster back-reference",
        "commands": [
            { "name": "add", "parameters": ["username", "email", "role"] },
            { "name": "list", "parameters": ["role"] },
            { "name": "show", "parameters": ["id"] }
        ],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_user_cli(store: &Store, cli: UserCli) -> Result<(), error::TechPathError> {
    match cli.command {
        UserCommand::Add {
            username,
            email,
            role,
        } => {
            let user = create_user(store, &username, &email, role)?;
            output::print_json(&user)?;
        }
        UserCommand::List { role } => {
            output::print_json(&list_users(store, role)?)?;
        }
        UserCommand::Show { id } => {
            output::print_json(&resolve_user(store, &id)?)?;
        }
    }
    Ok(())
}
