//! Mentorship connections between students and mentors, the roster, and conversation threads.
//!
//! One connection row exists per (student, mentor) pair:
//! `PENDING -> ACCEPTED | DECLINED | BLOCKED`, `ACCEPTED -> DECLINED | BLOCKED`,
//! `BLOCKED -> DECLINED` (unblock), and `DECLINED -> PENDING` on a new request.
//! A blocked student cannot request again until the mentor moves the row back to DECLINED.
//! The roster (`users.mentor_id`) is set on accept and cleared only by an explicit drop.

use crate::core::authz::{self, Role};
use crate::core::broker::Broker;
use crate::core::error;
use crate::core::notify;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::users::{self, USER_COLUMNS, User};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Declined,
    Blocked,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "PENDING",
            ConnectionStatus::Accepted => "ACCEPTED",
            ConnectionStatus::Declined => "DECLINED",
            ConnectionStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = error::TechPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ConnectionStatus::Pending),
            "ACCEPTED" => Ok(ConnectionStatus::Accepted),
            "DECLINED" => Ok(ConnectionStatus::Declined),
            "BLOCKED" => Ok(ConnectionStatus::Blocked),
            other => Err(error::TechPathError::ValidationError(format!(
                "Unknown connection status '{}'",
                other
            ))),
        }
    }
}

impl ToSql for ConnectionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConnectionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: error::TechPathError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MentorshipConnection {
    pub id: String,
    pub student_id: String,
    pub mentor_id: String,
    pub status: ConnectionStatus,
    pub message: String,
    pub created_at: String,
    pub updated_at: String,
}

const CONNECTION_COLUMNS: &str =
    "id, student_id, mentor_id, status, message, created_at, updated_at";

impl MentorshipConnection {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            mentor_id: row.get(2)?,
            status: row.get(3)?,
            message: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

/// A connection as seen from one side, with the other party's username.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionView {
    #[serde(flatten)]
    pub connection: MentorshipConnection,
    pub counterpart_username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationThread {
    pub id: String,
    pub student_id: String,
    pub mentor_id: String,
    pub created_at: String,
}

/// Headline numbers for a mentor's dashboard.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MentorStats {
    pub active_students: i64,
    pub pending_reviews: i64,
    pub total_approved: i64,
}

// --- CLI ---

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "mentor", about = "Connect students with mentors and manage rosters.")]
pub struct MentorCli {
    #[clap(long, global = true, value_enum, default_value = "json")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: MentorCommand,
}

#[derive(Subcommand, Debug)]
pub enum MentorCommand {
    /// List every mentor.
    List,
    /// Ask a mentor for mentorship.
    Request {
        #[clap(long)]
        student: String,
        #[clap(long)]
        mentor: String,
        #[clap(long, default_value = "")]
        message: String,
    },
    /// Accept, decline, or block a request.
    Decide {
        #[clap(long)]
        id: String,
        #[clap(long)]
        mentor: String,
        /// ACCEPTED, DECLINED, or BLOCKED
        #[clap(long)]
        status: ConnectionStatus,
    },
    /// Remove a student from a mentor's roster.
    Drop {
        #[clap(long)]
        mentor: String,
        #[clap(long)]
        student: String,
    },
    /// Show the students assigned to a mentor.
    Roster {
        #[clap(long)]
        mentor: String,
    },
    /// Requests addressed to a mentor.
    Requests {
        #[clap(long)]
        mentor: String,
        #[clap(long)]
        status: Option<ConnectionStatus>,
    },
    /// Requests a student has sent.
    Outgoing {
        #[clap(long)]
        student: String,
    },
    /// Conversation threads a user takes part in.
    Threads {
        #[clap(long)]
        user: String,
    },
    /// Roster size and review counts for a mentor.
    Stats {
        #[clap(long)]
        mentor: String,
    },
}

// --- Storage ---

pub fn initialize_mentorship_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "mentorship.init", |conn| {
        conn.execute_batch(schemas::MENTORSHIP_DB_SCHEMA)?;
        Ok(())
    })
}

fn find_pair(
    conn: &Connection,
    student_id: &str,
    mentor_id: &str,
) -> Result<Option<MentorshipConnection>, error::TechPathError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM mentorship_connections WHERE student_id = ?1 AND mentor_id = ?2",
                CONNECTION_COLUMNS
            ),
            params![student_id, mentor_id],
            MentorshipConnection::from_row,
        )
        .optional()?)
}

fn load_connection(
    conn: &Connection,
    connection_id: &str,
) -> Result<MentorshipConnection, error::TechPathError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM mentorship_connections WHERE id = ?1",
            CONNECTION_COLUMNS
        ),
        params![connection_id],
        MentorshipConnection::from_row,
    )
    .optional()?
    .ok_or_else(|| {
        error::TechPathError::NotFound(format!("Connection '{}' not found", connection_id))
    })
}

/// Mentor decisions allowed from each stored status.
fn ensure_decision(
    connection_id: &str,
    from: ConnectionStatus,
    to: ConnectionStatus,
) -> Result<(), error::TechPathError> {
    use ConnectionStatus::*;
    match (from, to) {
        (Pending, Accepted | Declined | Blocked)
        | (Accepted, Declined | Blocked)
        | (Blocked, Declined) => Ok(()),
        _ => Err(error::TechPathError::Conflict(format!(
            "connection '{}' is {}; it cannot move to {}",
            connection_id, from, to
        ))),
    }
}

fn load_mentor(conn: &Connection, mentor_id: &str) -> Result<User, error::TechPathError> {
    let mentor = users::load_user(conn, mentor_id)?;
    if mentor.role != Role::Mentor {
        return Err(error::TechPathError::NotFound(format!(
            "Mentor '{}' not found",
            mentor_id
        )));
    }
    Ok(mentor)
}

/// Student-initiated request. Re-requesting after a decline reopens the same row.
pub fn request_mentorship(
    store: &Store,
    student_id: &str,
    mentor_id: &str,
    message: &str,
) -> Result<MentorshipConnection, error::TechPathError> {
    let message = message.trim();

    let (connection, student) =
        store.broker().write(student_id, "mentorship.request", |conn| {
            let student = users::load_user(conn, student_id)?;
            authz::ensure_student(&student.id, student.role, "mentorship.request")?;
            load_mentor(conn, mentor_id)?;

            let now = time::now_epoch_z();
            match find_pair(conn, student_id, mentor_id)? {
                None => {
                    conn.execute(
                        "INSERT INTO mentorship_connections(id, student_id, mentor_id, status, message, created_at, updated_at)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        params![
                            time::new_id("MC"),
                            student_id,
                            mentor_id,
                            ConnectionStatus::Pending,
                            message,
                            now
                        ],
                    )?;
                }
                Some(existing) => match existing.status {
                    ConnectionStatus::Declined => {
                        conn.execute(
                            "UPDATE mentorship_connections SET status = ?1, message = ?2, updated_at = ?3
                             WHERE id = ?4",
                            params![ConnectionStatus::Pending, message, now, existing.id],
                        )?;
                    }
                    ConnectionStatus::Blocked => {
                        return Err(error::TechPathError::Forbidden(
                            "this mentor is not accepting requests from you".to_string(),
                        ));
                    }
                    ConnectionStatus::Pending | ConnectionStatus::Accepted => {
                        return Err(error::TechPathError::Conflict(format!(
                            "a {} connection with this mentor already exists",
                            existing.status
                        )));
                    }
                },
            }
            let connection = find_pair(conn, student_id, mentor_id)?.ok_or_else(|| {
                error::TechPathError::NotFound("connection vanished after write".to_string())
            })?;
            Ok((connection, student))
        })?;

    info!(
        connection = %connection.id,
        student = student_id,
        mentor = mentor_id,
        "mentorship requested"
    );
    notify::emit(
        store.notifier(),
        mentor_id,
        &format!("{} sent you a mentorship request.", student.username),
    );
    Ok(connection)
}

/// Mentor decision on a request addressed to them.
pub fn decide_connection(
    store: &Store,
    connection_id: &str,
    mentor_id: &str,
    new_status: ConnectionStatus,
) -> Result<MentorshipConnection, error::TechPathError> {
    if new_status == ConnectionStatus::Pending {
        return Err(error::TechPathError::ValidationError(
            "a decision must be ACCEPTED, DECLINED, or BLOCKED".to_string(),
        ));
    }

    let (connection, previous, mentor) =
        store.broker().write(mentor_id, "mentorship.decide", |conn| {
            let existing = load_connection(conn, connection_id)?;
            if existing.mentor_id != mentor_id {
                return Err(error::TechPathError::Forbidden(format!(
                    "connection '{}' is addressed to another mentor",
                    connection_id
                )));
            }
            ensure_decision(connection_id, existing.status, new_status)?;
            let mentor = users::load_user(conn, mentor_id)?;
            if new_status == ConnectionStatus::Accepted {
                let student = users::load_user(conn, &existing.student_id)?;
                if student.mentor_id.as_deref().is_some_and(|m| m != mentor_id) {
                    return Err(error::TechPathError::Conflict(format!(
                        "'{}' is already on another mentor's roster",
                        student.username
                    )));
                }
            }
            let now = time::now_epoch_z();
            conn.execute(
                "UPDATE mentorship_connections SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status, now, connection_id],
            )?;
            if new_status == ConnectionStatus::Accepted {
                users::set_mentor(conn, &existing.student_id, Some(mentor_id))?;
                conn.execute(
                    "INSERT OR IGNORE INTO conversation_threads(id, student_id, mentor_id, created_at)
                     VALUES(?1, ?2, ?3, ?4)",
                    params![time::new_id("TH"), existing.student_id, mentor_id, now],
                )?;
            }
            let previous = existing.status;
            Ok((load_connection(conn, connection_id)?, previous, mentor))
        })?;

    info!(connection = connection_id, from = %previous, to = %new_status, "mentorship decided");
    let message = match (previous, new_status) {
        (_, ConnectionStatus::Accepted) => {
            format!("{} accepted your mentorship request.", mentor.username)
        }
        (ConnectionStatus::Blocked, ConnectionStatus::Declined) => format!(
            "{} unblocked you. You can send a new mentorship request.",
            mentor.username
        ),
        (_, ConnectionStatus::Declined) => {
            format!("{} declined your mentorship request.", mentor.username)
        }
        _ => format!("{} is not accepting your requests.", mentor.username),
    };
    notify::emit(store.notifier(), &connection.student_id, &message);
    Ok(connection)
}

/// Remove a student from the mentor's roster and close their connection.
pub fn drop_student(
    store: &Store,
    mentor_id: &str,
    student_id: &str,
) -> Result<(), error::TechPathError> {
    let mentor = store.broker().write(mentor_id, "mentorship.drop", |conn| {
        let mentor = users::load_user(conn, mentor_id)?;
        authz::ensure_mentor(mentor_id, mentor.role, "mentorship.drop")?;
        let student = users::load_user(conn, student_id)?;
        if student.mentor_id.as_deref() != Some(mentor_id) {
            return Err(error::TechPathError::NotFound(format!(
                "'{}' is not on {}'s roster",
                student.username, mentor.username
            )));
        }
        users::set_mentor(conn, student_id, None)?;
        let now = time::now_epoch_z();
        conn.execute(
            "INSERT INTO mentorship_connections(id, student_id, mentor_id, status, message, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, '', ?5, ?5)
             ON CONFLICT(student_id, mentor_id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                time::new_id("MC"),
                student_id,
                mentor_id,
                ConnectionStatus::Declined,
                now
            ],
        )?;
        Ok(mentor)
    })?;

    info!(mentor = mentor_id, student = student_id, "student dropped from roster");
    notify::emit(
        store.notifier(),
        student_id,
        &format!("{} has ended your mentorship.", mentor.username),
    );
    Ok(())
}

pub fn roster(store: &Store, mentor_id: &str) -> Result<Vec<User>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE mentor_id = ?1 ORDER BY username",
            USER_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![mentor_id], User::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts over the mentor's current roster. `total_approved` counts reviewed completions only;
/// milestones a student toggled to completed are left out.
pub fn mentor_stats(store: &Store, mentor_id: &str) -> Result<MentorStats, error::TechPathError> {
    store.broker().read(|conn| {
        let mentor = users::load_user(conn, mentor_id)?;
        authz::ensure_mentor(mentor_id, mentor.role, "mentorship.stats")?;
        Ok(conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM users WHERE mentor_id = ?1),
                (SELECT COUNT(*) FROM user_progress up JOIN users u ON u.id = up.user_id
                  WHERE u.mentor_id = ?1 AND up.status = 'PENDING_REVIEW'),
                (SELECT COUNT(*) FROM user_progress up JOIN users u ON u.id = up.user_id
                  WHERE u.mentor_id = ?1 AND up.status = 'COMPLETED'
                    AND up.submitted_at IS NOT NULL)",
            params![mentor_id],
            |row| {
                Ok(MentorStats {
                    active_students: row.get(0)?,
                    pending_reviews: row.get(1)?,
                    total_approved: row.get(2)?,
                })
            },
        )?)
    })
}

pub fn list_mentors(store: &Store) -> Result<Vec<User>, error::TechPathError> {
    users::list_users(store, Some(Role::Mentor))
}

fn connection_views(
    conn: &Connection,
    side_column: &str,
    counterpart_column: &str,
    user_id: &str,
    status: Option<ConnectionStatus>,
) -> Result<Vec<ConnectionView>, error::TechPathError> {
    let sql = format!(
        "SELECT c.id, c.student_id, c.mentor_id, c.status, c.message, c.created_at, c.updated_at,
                u.username
         FROM mentorship_connections c
         JOIN users u ON u.id = c.{counterpart}
         WHERE c.{side} = ?1 AND (?2 IS NULL OR c.status = ?2)
         ORDER BY c.updated_at DESC, c.rowid DESC",
        side = side_column,
        counterpart = counterpart_column,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, status], |row| {
            Ok(ConnectionView {
                connection: MentorshipConnection::from_row(row)?,
                counterpart_username: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn incoming_requests(
    store: &Store,
    mentor_id: &str,
    status: Option<ConnectionStatus>,
) -> Result<Vec<ConnectionView>, error::TechPathError> {
    store
        .broker()
        .read(|conn| connection_views(conn, "mentor_id", "student_id", mentor_id, status))
}

pub fn outgoing_requests(
    store: &Store,
    student_id: &str,
) -> Result<Vec<ConnectionView>, error::TechPathError> {
    store
        .broker()
        .read(|conn| connection_views(conn, "student_id", "mentor_id", student_id, None))
}

pub fn get_connection(
    store: &Store,
    connection_id: &str,
) -> Result<MentorshipConnection, error::TechPathError> {
    store.broker().read(|conn| load_connection(conn, connection_id))
}

pub fn list_threads(
    store: &Store,
    user_id: &str,
) -> Result<Vec<ConversationThread>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, student_id, mentor_id, created_at FROM conversation_threads
             WHERE student_id = ?1 OR mentor_id = ?1
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(ConversationThread {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    mentor_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "mentorship",
        "version": "0.1.0",
        "description": "Student/mentor connection state machine, rosters, conversation threads",
        "commands": [
            { "name": "list", "description": "Mentor directory" },
            { "name": "request", "parameters": ["student", "mentor", "message"] },
            { "name": "decide", "parameters": ["id", "mentor", "status"] },
            { "name": "drop", "parameters": ["mentor", "student"] },
            { "name": "roster", "parameters": ["mentor"] },
            { "name": "requests", "parameters": ["mentor", "status"] },
            { "name": "outgoing", "parameters": ["student"] },
            { "name": "threads", "parameters": ["user"] },
            { "name": "stats", "parameters": ["mentor"] }
        ],
        "states": ["PENDING", "ACCEPTED", "DECLINED", "BLOCKED"],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

fn print_users(
    format: OutputFormat,
    heading: &str,
    list: &[User],
) -> Result<(), error::TechPathError> {
    use colored::Colorize;

    match format {
        OutputFormat::Json => output::print_json(&list),
        OutputFormat::Text => {
            println!("{}", heading.bold());
            if list.is_empty() {
                println!("  (none)");
            }
            for user in list {
                println!("- {} {} <{}>", user.id.dimmed(), user.username, user.email);
            }
            Ok(())
        }
    }
}

pub fn run_mentor_cli(store: &Store, cli: MentorCli) -> Result<(), error::TechPathError> {
    match cli.command {
        MentorCommand::List => print_users(cli.format, "Mentors", &list_mentors(store)?)?,
        MentorCommand::Request {
            student,
            mentor,
            message,
        } => {
            let student = users::resolve_user(store, &student)?;
            let mentor = users::resolve_user(store, &mentor)?;
            let connection = request_mentorship(store, &student.id, &mentor.id, &message)?;
            output::print_json(&time::command_envelope(
                "mentor.request",
                "ok",
                serde_json::json!({ "connection": connection }),
            ))?;
        }
        MentorCommand::Decide { id, mentor, status } => {
            let mentor = users::resolve_user(store, &mentor)?;
            let connection = decide_connection(store, &id, &mentor.id, status)?;
            output::print_json(&time::command_envelope(
                "mentor.decide",
                "ok",
                serde_json::json!({ "connection": connection }),
            ))?;
        }
        MentorCommand::Drop { mentor, student } => {
            let mentor = users::resolve_user(store, &mentor)?;
            let student = users::resolve_user(store, &student)?;
            drop_student(store, &mentor.id, &student.id)?;
            output::print_json(&time::command_envelope(
                "mentor.drop",
                "ok",
                serde_json::json!({ "mentor_id": mentor.id, "student_id": student.id }),
            ))?;
        }
        MentorCommand::Roster { mentor } => {
            let mentor = users::resolve_user(store, &mentor)?;
            let heading = format!("Roster of {}", mentor.username);
            print_users(cli.format, &heading, &roster(store, &mentor.id)?)?;
        }
        MentorCommand::Requests { mentor, status } => {
            let mentor = users::resolve_user(store, &mentor)?;
            output::print_json(&incoming_requests(store, &mentor.id, status)?)?;
        }
        MentorCommand::Outgoing { student } => {
            let student = users::resolve_user(store, &student)?;
            output::print_json(&outgoing_requests(store, &student.id)?)?;
        }
        MentorCommand::Threads { user } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&list_threads(store, &user.id)?)?;
        }
        MentorCommand::Stats { mentor } => {
            let mentor = users::resolve_user(store, &mentor)?;
            output::print_json(&mentor_stats(store, &mentor.id)?)?;
        }
    }
    Ok(())
}
