//! Badges awarded when milestones are completed.
//!
//! Badge definitions are keyed by title and created on first award. Awarding relies on the
//! UNIQUE constraints plus `INSERT OR IGNORE`, so racing evaluations never duplicate a badge.

use crate::core::broker::Broker;
use crate::core::error;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub const FIRST_STEP_TITLE: &str = "First Step Taken";
const FIRST_STEP_POINTS: i64 = 50;
const SPECIALIST_POINTS: i64 = 150;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub badge_icon: String,
    pub points: i64,
}

/// A badge held by a user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EarnedAchievement {
    pub achievement_id: String,
    pub title: String,
    pub description: String,
    pub badge_icon: String,
    pub points: i64,
    pub earned_at: String,
}

impl EarnedAchievement {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            achievement_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            badge_icon: row.get(3)?,
            points: row.get(4)?,
            earned_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub points: i64,
    pub badges: i64,
}

struct BadgeDef {
    title: String,
    description: String,
    badge_icon: &'static str,
    points: i64,
}

impl BadgeDef {
    fn first_step() -> Self {
        Self {
            title: FIRST_STEP_TITLE.to_string(),
            description: "You've successfully completed your first roadmap milestone!".to_string(),
            badge_icon: "Award",
            points: FIRST_STEP_POINTS,
        }
    }

    fn specialist(path_title: &str, threshold: u32) -> Self {
        Self {
            title: specialist_title(path_title),
            description: format!(
                "Mastered {} core milestones in {}.",
                threshold, path_title
            ),
            badge_icon: "ShieldCheck",
            points: SPECIALIST_POINTS,
        }
    }
}

pub fn specialist_title(path_title: &str) -> String {
    format!("{} Specialist", path_title)
}

// --- CLI ---

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "badge", about = "Inspect earned badges and the points leaderboard.")]
pub struct BadgeCli {
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: BadgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum BadgeCommand {
    /// Badges a user has earned.
    List {
        #[clap(long)]
        user: String,
    },
    /// Students ranked by badge points.
    Leaderboard {
        #[clap(long, default_value_t = 10)]
        limit: u32,
    },
}

// --- Storage ---

pub fn initialize_achievements_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "achievements.init", |conn| {
        conn.execute_batch(schemas::ACHIEVEMENTS_DB_SCHEMA)?;
        Ok(())
    })
}

const EARNED_SELECT: &str = "SELECT a.id, a.title, a.description, a.badge_icon, a.points, ua.earned_at
     FROM user_achievements ua JOIN achievements a ON a.id = ua.achievement_id";

/// Get-or-create the badge, then award it. Returns the award only when it is new.
fn award(
    conn: &Connection,
    user_id: &str,
    badge: &BadgeDef,
) -> Result<Option<EarnedAchievement>, error::TechPathError> {
    conn.execute(
        "INSERT OR IGNORE INTO achievements(id, title, description, badge_icon, points)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            time::new_id("AC"),
            badge.title,
            badge.description,
            badge.badge_icon,
            badge.points
        ],
    )?;
    let achievement_id: String = conn.query_row(
        "SELECT id FROM achievements WHERE title = ?1",
        params![badge.title],
        |row| row.get(0),
    )?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO user_achievements(id, user_id, achievement_id, earned_at, is_notified)
         VALUES(?1, ?2, ?3, ?4, 0)",
        params![
            time::new_id("UA"),
            user_id,
            achievement_id,
            time::now_epoch_z()
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(conn
        .query_row(
            &format!(
                "{} WHERE ua.user_id = ?1 AND ua.achievement_id = ?2",
                EARNED_SELECT
            ),
            params![user_id, achievement_id],
            EarnedAchievement::from_row,
        )
        .optional()?)
}

/// Evaluate badge rules after a milestone in `path_id` was completed by `user_id`.
pub fn on_milestone_completed(
    store: &Store,
    user_id: &str,
    path_id: &str,
) -> Result<Vec<EarnedAchievement>, error::TechPathError> {
    let threshold = store.config.achievements.specialist_threshold;

    let earned = store.broker().write(user_id, "achievements.evaluate", |conn| {
        let mut earned = Vec::new();
        earned.extend(award(conn, user_id, &BadgeDef::first_step())?);

        let (path_title, completed): (String, i64) = conn.query_row(
            "SELECT p.title,
                    (SELECT COUNT(*) FROM user_progress up
                     JOIN milestones m ON m.id = up.milestone_id
                     WHERE up.user_id = ?1 AND up.status = 'COMPLETED' AND m.path_id = p.id)
             FROM career_paths p WHERE p.id = ?2",
            params![user_id, path_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if completed >= i64::from(threshold) {
            earned.extend(award(
                conn,
                user_id,
                &BadgeDef::specialist(&path_title, threshold),
            )?);
        }
        Ok(earned)
    })?;

    for badge in &earned {
        info!(user = user_id, badge = %badge.title, points = badge.points, "badge awarded");
    }
    Ok(earned)
}

pub fn list_user_achievements(
    store: &Store,
    user_id: &str,
) -> Result<Vec<EarnedAchievement>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ua.user_id = ?1 ORDER BY ua.earned_at, ua.rowid",
            EARNED_SELECT
        ))?;
        let rows = stmt
            .query_map(params![user_id], EarnedAchievement::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Badges not yet shown to the user. Each badge is returned exactly once.
pub fn take_unnotified(
    store: &Store,
    user_id: &str,
) -> Result<Vec<EarnedAchievement>, error::TechPathError> {
    store.broker().write(user_id, "achievements.take_unnotified", |conn| {
        let fresh = {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE ua.user_id = ?1 AND ua.is_notified = 0 ORDER BY ua.earned_at, ua.rowid",
                EARNED_SELECT
            ))?;
            stmt.query_map(params![user_id], EarnedAchievement::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        conn.execute(
            "UPDATE user_achievements SET is_notified = 1 WHERE user_id = ?1 AND is_notified = 0",
            params![user_id],
        )?;
        Ok(fresh)
    })
}

/// Students ranked by total badge points, ties broken by username.
pub fn leaderboard(
    store: &Store,
    limit: u32,
) -> Result<Vec<LeaderboardEntry>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT u.id, u.username, COALESCE(SUM(a.points), 0), COUNT(a.id)
             FROM users u
             LEFT JOIN user_achievements ua ON ua.user_id = u.id
             LEFT JOIN achievements a ON a.id = ua.achievement_id
             WHERE u.role = 'STUDENT'
             GROUP BY u.id
             ORDER BY 3 DESC, u.username ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(LeaderboardEntry {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    points: row.get(2)?,
                    badges: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "achievements",
        "version": "0.1.0",
        "description": "Milestone badges and the points leaderboard",
        "commands": [
            { "name": "list", "parameters": ["user"] },
            { "name": "leaderboard", "parameters": ["limit"] }
        ],
        "badges": [
            { "title": FIRST_STEP_TITLE, "points": FIRST_STEP_POINTS, "icon": "Award" },
            { "title": "{path} Specialist", "points": SPECIALIST_POINTS, "icon": "ShieldCheck" }
        ],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_badge_cli(store: &Store, cli: BadgeCli) -> Result<(), error::TechPathError> {
    use colored::Colorize;

    match cli.command {
        BadgeCommand::List { user } => {
            let user = crate::plugins::users::resolve_user(store, &user)?;
            let badges = list_user_achievements(store, &user.id)?;
            match cli.format {
                OutputFormat::Json => output::print_json(&badges)?,
                OutputFormat::Text => {
                    if badges.is_empty() {
                        println!("{} has no badges yet.", user.username);
                    }
                    for b in &badges {
                        println!(
                            "{} {} ({} pts) {}",
                            "*".yellow(),
                            b.title.bold(),
                            b.points,
                            b.description.dimmed()
                        );
                    }
                }
            }
        }
        BadgeCommand::Leaderboard { limit } => {
            let entries = leaderboard(store, limit)?;
            match cli.format {
                OutputFormat::Json => output::print_json(&entries)?,
                OutputFormat::Text => {
                    for (rank, e) in entries.iter().enumerate() {
                        println!(
                            "{:>3}. {:<24} {:>6} pts  {} badges",
                            rank + 1,
                            e.username,
                            e.points,
                            e.badges
                        );
                    }
                }
            }
        }
    }
    Ok(())
}
