//! Milestone progress: the per-(user, milestone) review state machine.
//!
//! ```text
//! IN_PROGRESS --submit--> PENDING_REVIEW --approve--> COMPLETED
//!                              |  ^
//!                       reject |  | resubmit
//!                              v  |
//!                            REJECTED
//! ```
//!
//! Each transition is one read-modify-write inside a single immediate transaction. Side effects
//! (notices, badge evaluation) run after it commits.

use crate::core::authz::{self, Role};
use crate::core::broker::Broker;
use crate::core::error;
use crate::core::notify;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::achievements::{self, EarnedAchievement};
use crate::plugins::catalog;
use crate::plugins::users;
use clap::{Parser, Subcommand};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    InProgress,
    PendingReview,
    Completed,
    Rejected,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "IN_PROGRESS",
            ProgressStatus::PendingReview => "PENDING_REVIEW",
            ProgressStatus::Completed => "COMPLETED",
            ProgressStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressStatus {
    type Err = error::TechPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN_PROGRESS" => Ok(ProgressStatus::InProgress),
            "PENDING_REVIEW" => Ok(ProgressStatus::PendingReview),
            "COMPLETED" => Ok(ProgressStatus::Completed),
            "REJECTED" => Ok(ProgressStatus::Rejected),
            other => Err(error::TechPathError::ValidationError(format!(
                "Unknown progress status '{}'",
                other
            ))),
        }
    }
}

impl ToSql for ProgressStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProgressStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: error::TechPathError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl FromStr for ReviewAction {
    type Err = error::TechPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(ReviewAction::Approve),
            "REJECT" => Ok(ReviewAction::Reject),
            other => Err(error::TechPathError::ValidationError(format!(
                "Invalid review action '{}'; expected APPROVE or REJECT",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProgress {
    pub id: String,
    pub user_id: String,
    pub milestone_id: String,
    pub status: ProgressStatus,
    pub submission_url: Option<String>,
    pub submission_notes: Option<String>,
    pub mentor_feedback: Option<String>,
    pub submitted_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

const PROGRESS_COLUMNS: &str = "id, user_id, milestone_id, status, submission_url, \
     submission_notes, mentor_feedback, submitted_at, completed_at, updated_at";

impl UserProgress {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            milestone_id: row.get(2)?,
            status: row.get(3)?,
            submission_url: row.get(4)?,
            submission_notes: row.get(5)?,
            mentor_feedback: row.get(6)?,
            submitted_at: row.get(7)?,
            completed_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

/// Result of a review. `changed` is false for a repeated approval.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub progress: UserProgress,
    pub changed: bool,
    pub achievements: Vec<EarnedAchievement>,
}

/// One row of a mentor's review queue.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingReview {
    pub progress_id: String,
    pub student_id: String,
    pub student_username: String,
    pub milestone_id: String,
    pub milestone_title: String,
    pub path_title: String,
    pub submission_url: Option<String>,
    pub submission_notes: Option<String>,
    pub submitted_at: Option<String>,
}

/// A completed milestone as shown on a student's portfolio.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioEntry {
    pub progress_id: String,
    pub milestone_id: String,
    pub milestone_title: String,
    pub path_title: String,
    pub project_url: Option<String>,
    pub mentor_notes: Option<String>,
    pub completion_date: Option<String>,
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "progress", about = "Track milestone submissions and mentor reviews.")]
pub struct ProgressCli {
    #[clap(subcommand)]
    pub command: ProgressCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProgressCommand {
    /// Flip a milestone between completed and in progress without review.
    Toggle {
        #[clap(long)]
        user: String,
        #[clap(long)]
        milestone: String,
    },
    /// Submit work for mentor review.
    Submit {
        #[clap(long)]
        user: String,
        #[clap(long)]
        milestone: String,
        #[clap(long)]
        url: String,
        #[clap(long)]
        notes: Option<String>,
    },
    /// Approve or reject a submission.
    Review {
        #[clap(long)]
        id: String,
        /// Reviewer id or username
        #[clap(long)]
        actor: String,
        /// APPROVE or REJECT
        #[clap(long)]
        action: ReviewAction,
        #[clap(long, default_value = "")]
        feedback: String,
    },
    /// List submissions waiting on a mentor.
    Pending {
        #[clap(long)]
        mentor: String,
    },
    /// Show one progress row.
    Show {
        #[clap(long)]
        id: String,
    },
    /// Completed milestones of a user, newest first.
    Portfolio {
        #[clap(long)]
        user: String,
    },
}

// --- Storage ---

pub fn initialize_progress_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "progress.init", |conn| {
        conn.execute_batch(schemas::PROGRESS_DB_SCHEMA)?;
        Ok(())
    })
}

fn find_row(
    conn: &Connection,
    user_id: &str,
    milestone_id: &str,
) -> Result<Option<UserProgress>, error::TechPathError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM user_progress WHERE user_id = ?1 AND milestone_id = ?2",
                PROGRESS_COLUMNS
            ),
            params![user_id, milestone_id],
            UserProgress::from_row,
        )
        .optional()?)
}

fn load_row(conn: &Connection, progress_id: &str) -> Result<UserProgress, error::TechPathError> {
    conn.query_row(
        &format!("SELECT {} FROM user_progress WHERE id = ?1", PROGRESS_COLUMNS),
        params![progress_id],
        UserProgress::from_row,
    )
    .optional()?
    .ok_or_else(|| {
        error::TechPathError::NotFound(format!("Progress record '{}' not found", progress_id))
    })
}

fn load_pair(
    conn: &Connection,
    user_id: &str,
    milestone_id: &str,
) -> Result<UserProgress, error::TechPathError> {
    find_row(conn, user_id, milestone_id)?.ok_or_else(|| {
        error::TechPathError::NotFound(format!(
            "No progress for user '{}' on milestone '{}'",
            user_id, milestone_id
        ))
    })
}

/// Flip a milestone between COMPLETED and IN_PROGRESS directly.
pub fn toggle_milestone(
    store: &Store,
    user_id: &str,
    milestone_id: &str,
) -> Result<UserProgress, error::TechPathError> {
    if !store.config.progress.allow_toggle {
        return Err(error::TechPathError::Forbidden(
            "direct completion toggle is disabled; submit the milestone for review".to_string(),
        ));
    }

    let row = store.broker().write(user_id, "progress.toggle", |conn| {
        users::load_user(conn, user_id)?;
        catalog::load_milestone(conn, milestone_id)?;
        let now = time::now_epoch_z();
        let (status, completed_at) = match find_row(conn, user_id, milestone_id)? {
            Some(row) if row.status == ProgressStatus::Completed => {
                (ProgressStatus::InProgress, None)
            }
            _ => (ProgressStatus::Completed, Some(now.clone())),
        };
        conn.execute(
            "INSERT INTO user_progress(id, user_id, milestone_id, status, completed_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, milestone_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at",
            params![
                time::new_id("UP"),
                user_id,
                milestone_id,
                status,
                completed_at,
                now
            ],
        )?;
        load_pair(conn, user_id, milestone_id)
    })?;

    info!(user = user_id, milestone = milestone_id, status = %row.status, "milestone toggled");
    Ok(row)
}

/// Submit work for review and tell the student's mentor.
pub fn submit_milestone(
    store: &Store,
    user_id: &str,
    milestone_id: &str,
    submission_url: &str,
    notes: Option<&str>,
) -> Result<UserProgress, error::TechPathError> {
    let url = submission_url.trim();
    if url.is_empty() {
        return Err(error::TechPathError::ValidationError(
            "submission url must not be empty".to_string(),
        ));
    }
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());

    let (row, student, milestone_title) =
        store.broker().write(user_id, "progress.submit", |conn| {
            let student = users::load_user(conn, user_id)?;
            let (milestone, _) = catalog::load_milestone(conn, milestone_id)?;
            let existing = find_row(conn, user_id, milestone_id)?;
            if existing.is_some_and(|row| row.status == ProgressStatus::Completed) {
                return Err(error::TechPathError::Conflict(format!(
                    "milestone '{}' is already completed",
                    milestone.title
                )));
            }
            let now = time::now_epoch_z();
            conn.execute(
                "INSERT INTO user_progress(id, user_id, milestone_id, status, submission_url,
                                           submission_notes, submitted_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(user_id, milestone_id) DO UPDATE SET
                    status = excluded.status,
                    submission_url = excluded.submission_url,
                    submission_notes = excluded.submission_notes,
                    submitted_at = excluded.submitted_at,
                    updated_at = excluded.updated_at",
                params![
                    time::new_id("UP"),
                    user_id,
                    milestone_id,
                    ProgressStatus::PendingReview,
                    url,
                    notes,
                    now
                ],
            )?;
            let row = load_pair(conn, user_id, milestone_id)?;
            Ok((row, student, milestone.title))
        })?;

    info!(user = user_id, progress = %row.id, "milestone submitted for review");
    if let Some(mentor_id) = student.mentor_id.as_deref() {
        notify::emit(
            store.notifier(),
            mentor_id,
            &format!(
                "{} submitted \"{}\" for review.",
                student.username, milestone_title
            ),
        );
    }
    Ok(row)
}

fn with_feedback(message: String, feedback: &str) -> String {
    if feedback.is_empty() {
        message
    } else {
        format!("{} Feedback: {}", message, feedback)
    }
}

/// Approve or reject a submitted milestone.
pub fn review_progress(
    store: &Store,
    progress_id: &str,
    actor_id: &str,
    action: ReviewAction,
    feedback: &str,
) -> Result<ReviewOutcome, error::TechPathError> {
    let feedback = feedback.trim();
    if action == ReviewAction::Reject && feedback.is_empty() {
        return Err(error::TechPathError::ValidationError(
            "a rejection needs feedback for the student".to_string(),
        ));
    }

    let (row, changed, path_id, milestone_title) =
        store.broker().write(actor_id, "progress.review", |conn| {
            let row = load_row(conn, progress_id)?;
            let actor = users::load_user(conn, actor_id)?;
            let student = users::load_user(conn, &row.user_id)?;
            authz::ensure_assigned_reviewer(
                &actor.id,
                actor.role,
                student.mentor_id.as_deref(),
                "progress.review",
            )?;
            let (milestone, path) = catalog::load_milestone(conn, &row.milestone_id)?;

            let next = match (row.status, action) {
                (ProgressStatus::InProgress, _) => {
                    return Err(error::TechPathError::Conflict(format!(
                        "'{}' has not been submitted for review",
                        milestone.title
                    )));
                }
                (ProgressStatus::Completed, ReviewAction::Approve) => {
                    return Ok((row, false, path.id, milestone.title));
                }
                (ProgressStatus::Completed, ReviewAction::Reject) => {
                    return Err(error::TechPathError::Conflict(format!(
                        "'{}' is already completed and cannot be rejected",
                        milestone.title
                    )));
                }
                (_, ReviewAction::Approve) => ProgressStatus::Completed,
                (_, ReviewAction::Reject) => ProgressStatus::Rejected,
            };

            let now = time::now_epoch_z();
            conn.execute(
                "UPDATE user_progress SET
                    status = ?1,
                    mentor_feedback = ?2,
                    completed_at = CASE WHEN ?1 = 'COMPLETED' THEN ?3 ELSE completed_at END,
                    updated_at = ?3
                 WHERE id = ?4",
                params![next, feedback, now, row.id],
            )?;
            let row = load_row(conn, progress_id)?;
            Ok((row, true, path.id, milestone.title))
        })?;

    if !changed {
        info!(progress = progress_id, "approval repeated; nothing to do");
        return Ok(ReviewOutcome {
            progress: row,
            changed,
            achievements: Vec::new(),
        });
    }

    info!(progress = progress_id, reviewer = actor_id, status = %row.status, "submission reviewed");
    let mut earned = Vec::new();
    let message = match action {
        ReviewAction::Approve => {
            match achievements::on_milestone_completed(store, &row.user_id, &path_id) {
                Ok(awarded) => earned = awarded,
                Err(e) => warn!(user = %row.user_id, error = %e, "achievement evaluation failed"),
            }
            with_feedback(
                format!("Your submission for \"{}\" was approved!", milestone_title),
                feedback,
            )
        }
        ReviewAction::Reject => with_feedback(
            format!("Your submission for \"{}\" needs changes.", milestone_title),
            feedback,
        ),
    };
    notify::emit(store.notifier(), &row.user_id, &message);

    Ok(ReviewOutcome {
        progress: row,
        changed,
        achievements: earned,
    })
}

/// Submissions awaiting review for the mentor's roster, oldest first. Administrators see every
/// pending submission.
pub fn pending_reviews(
    store: &Store,
    mentor_id: &str,
) -> Result<Vec<PendingReview>, error::TechPathError> {
    store.broker().read(|conn| {
        let actor = users::load_user(conn, mentor_id)?;
        authz::ensure_reviewer(&actor.id, actor.role, "progress.pending")?;
        let mut stmt = conn.prepare(
            "SELECT up.id, u.id, u.username, m.id, m.title, p.title,
                    up.submission_url, up.submission_notes, up.submitted_at
             FROM user_progress up
             JOIN users u ON u.id = up.user_id
             JOIN milestones m ON m.id = up.milestone_id
             JOIN career_paths p ON p.id = m.path_id
             WHERE up.status = 'PENDING_REVIEW' AND (?2 = 1 OR u.mentor_id = ?1)
             ORDER BY up.submitted_at, up.rowid",
        )?;
        let rows = stmt
            .query_map(params![mentor_id, actor.role == Role::Admin], |row| {
                Ok(PendingReview {
                    progress_id: row.get(0)?,
                    student_id: row.get(1)?,
                    student_username: row.get(2)?,
                    milestone_id: row.get(3)?,
                    milestone_title: row.get(4)?,
                    path_title: row.get(5)?,
                    submission_url: row.get(6)?,
                    submission_notes: row.get(7)?,
                    submitted_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Everything the user has completed, with the reviewer's notes.
pub fn portfolio(
    store: &Store,
    user_id: &str,
) -> Result<Vec<PortfolioEntry>, error::TechPathError> {
    store.broker().read(|conn| {
        users::load_user(conn, user_id)?;
        let mut stmt = conn.prepare(
            "SELECT up.id, m.id, m.title, p.title, up.submission_url, up.mentor_feedback,
                    up.completed_at
             FROM user_progress up
             JOIN milestones m ON m.id = up.milestone_id
             JOIN career_paths p ON p.id = m.path_id
             WHERE up.user_id = ?1 AND up.status = 'COMPLETED'
             ORDER BY up.completed_at DESC, up.rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(PortfolioEntry {
                    progress_id: row.get(0)?,
                    milestone_id: row.get(1)?,
                    milestone_title: row.get(2)?,
                    path_title: row.get(3)?,
                    project_url: row.get(4)?,
                    mentor_notes: row.get(5)?,
                    completion_date: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn get_progress(
    store: &Store,
    progress_id: &str,
) -> Result<UserProgress, error::TechPathError> {
    store.broker().read(|conn| load_row(conn, progress_id))
}

pub fn progress_for(
    store: &Store,
    user_id: &str,
    milestone_id: &str,
) -> Result<Option<UserProgress>, error::TechPathError> {
    store
        .broker()
        .read(|conn| find_row(conn, user_id, milestone_id))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "progress",
        "version": "0.1.0",
        "description": "Milestone submission and review state machine",
        "commands": [
            { "name": "toggle", "parameters": ["user", "milestone"] },
            { "name": "submit", "parameters": ["user", "milestone", "url", "notes"] },
            { "name": "review", "parameters": ["id", "actor", "action", "feedback"] },
            { "name": "pending", "parameters": ["mentor"] },
            { "name": "show", "parameters": ["id"] },
            { "name": "portfolio", "parameters": ["user"] }
        ],
        "states": ["IN_PROGRESS", "PENDING_REVIEW", "COMPLETED", "REJECTED"],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_progress_cli(store: &Store, cli: ProgressCli) -> Result<(), error::TechPathError> {
    match cli.command {
        ProgressCommand::Toggle { user, milestone } => {
            let user = users::resolve_user(store, &user)?;
            let row = toggle_milestone(store, &user.id, &milestone)?;
            output::print_json(&time::command_envelope(
                "progress.toggle",
                "ok",
                serde_json::json!({ "progress": row }),
            ))?;
        }
        ProgressCommand::Submit {
            user,
            milestone,
            url,
            notes,
        } => {
            let user = users::resolve_user(store, &user)?;
            let row = submit_milestone(store, &user.id, &milestone, &url, notes.as_deref())?;
            output::print_json(&time::command_envelope(
                "progress.submit",
                "ok",
                serde_json::json!({ "progress": row }),
            ))?;
        }
        ProgressCommand::Review {
            id,
            actor,
            action,
            feedback,
        } => {
            let actor = users::resolve_user(store, &actor)?;
            let outcome = review_progress(store, &id, &actor.id, action, &feedback)?;
            output::print_json(&time::command_envelope(
                "progress.review",
                "ok",
                serde_json::to_value(outcome)?,
            ))?;
        }
        ProgressCommand::Pending { mentor } => {
            let mentor = users::resolve_user(store, &mentor)?;
            output::print_json(&pending_reviews(store, &mentor.id)?)?;
        }
        ProgressCommand::Show { id } => {
            output::print_json(&get_progress(store, &id)?)?;
        }
        ProgressCommand::Portfolio { user } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&portfolio(store, &user.id)?)?;
        }
    }
    Ok(())
}
