//! Roadmap resolution: pick a career path for a trait code and overlay one user's progress.
//!
//! Resolution is read-only. It costs three queries regardless of milestone count: path
//! selection, milestones joined with their resources, and the user's progress rows for the path.

use crate::core::config::RoadmapFallback;
use crate::core::error;
use crate::core::output;
use crate::core::store::Store;
use crate::plugins::assessment;
use crate::plugins::catalog::{self, CareerPath, LearningResource, PATH_COLUMNS, ResourceType};
use crate::plugins::progress::ProgressStatus;
use crate::plugins::users;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MilestoneView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub order: i64,
    pub resources: Vec<LearningResource>,
    pub status: ProgressStatus,
    pub is_completed: bool,
    pub progress_id: Option<String>,
    pub submission_url: Option<String>,
    pub submission_notes: Option<String>,
    pub mentor_feedback: Option<String>,
    pub submitted_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoadmapView {
    pub user_id: String,
    pub path: CareerPath,
    pub milestones: Vec<MilestoneView>,
    pub completed_count: usize,
    pub total_count: usize,
    pub completion_percentage: f64,
}

/// Share of completed milestones in percent; an empty path is 0%.
pub fn completion_percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * completed as f64 / total as f64
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "roadmap", about = "Resolve career roadmaps and progress overlays.")]
pub struct RoadmapCli {
    #[clap(subcommand)]
    pub command: RoadmapCommand,
}

#[derive(Subcommand, Debug)]
pub enum RoadmapCommand {
    /// Resolve the roadmap for an explicit trait code.
    Show {
        #[clap(long)]
        user: String,
        /// One- or two-letter code, e.g. `IA`
        #[clap(long)]
        code: String,
    },
    /// Resolve the roadmap from the user's latest assessment.
    Mine {
        #[clap(long)]
        user: String,
    },
}

// --- Resolution ---

struct ProgressOverlay {
    id: String,
    status: ProgressStatus,
    submission_url: Option<String>,
    submission_notes: Option<String>,
    mentor_feedback: Option<String>,
    submitted_at: Option<String>,
    completed_at: Option<String>,
}

/// Exact code first, then the code's first letter.
fn select_path(conn: &Connection, code: &str) -> Result<Option<CareerPath>, error::TechPathError> {
    let primary: String = code.chars().take(1).collect();
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM career_paths
                 WHERE trait_code IN (?1, ?2)
                 ORDER BY CASE WHEN trait_code = ?1 THEN 0 ELSE 1 END
                 LIMIT 1",
                PATH_COLUMNS
            ),
            params![code, primary],
            CareerPath::from_row,
        )
        .optional()?)
}

pub(crate) fn build_view(
    conn: &Connection,
    user_id: &str,
    path: CareerPath,
) -> Result<RoadmapView, error::TechPathError> {
    let mut milestones: Vec<MilestoneView> = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT m.id, m.title, m.description, m.sort_order,
                    r.id, r.title, r.url, r.resource_type, r.category
             FROM milestones m
             LEFT JOIN learning_resources r ON r.milestone_id = m.id
             WHERE m.path_id = ?1
             ORDER BY m.sort_order, m.rowid, r.rowid",
        )?;
        let mut rows = stmt.query(params![path.id])?;
        while let Some(row) = rows.next()? {
            let milestone_id: String = row.get(0)?;
            if milestones.last().map(|m| m.id.as_str()) != Some(milestone_id.as_str()) {
                milestones.push(MilestoneView {
                    id: milestone_id.clone(),
                    title: row.get(1)?,
                    description: row.get(2)?,
                    order: row.get(3)?,
                    resources: Vec::new(),
                    status: ProgressStatus::InProgress,
                    is_completed: false,
                    progress_id: None,
                    submission_url: None,
                    submission_notes: None,
                    mentor_feedback: None,
                    submitted_at: None,
                    completed_at: None,
                });
            }
            let resource_id: Option<String> = row.get(4)?;
            if let (Some(id), Some(current)) = (resource_id, milestones.last_mut()) {
                let resource_type: ResourceType = row.get(7)?;
                current.resources.push(LearningResource {
                    id,
                    milestone_id,
                    title: row.get(5)?,
                    url: row.get(6)?,
                    resource_type,
                    category: row.get(8)?,
                });
            }
        }
    }

    let mut progress: FxHashMap<String, ProgressOverlay> = FxHashMap::default();
    {
        let mut stmt = conn.prepare(
            "SELECT up.milestone_id, up.id, up.status, up.submission_url, up.submission_notes,
                    up.mentor_feedback, up.submitted_at, up.completed_at
             FROM user_progress up
             JOIN milestones m ON m.id = up.milestone_id
             WHERE up.user_id = ?1 AND m.path_id = ?2",
        )?;
        let rows = stmt.query_map(params![user_id, path.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ProgressOverlay {
                    id: row.get(1)?,
                    status: row.get(2)?,
                    submission_url: row.get(3)?,
                    submission_notes: row.get(4)?,
                    mentor_feedback: row.get(5)?,
                    submitted_at: row.get(6)?,
                    completed_at: row.get(7)?,
                },
            ))
        })?;
        for row in rows {
            let (milestone_id, overlay) = row?;
            progress.insert(milestone_id, overlay);
        }
    }

    for milestone in &mut milestones {
        if let Some(p) = progress.remove(&milestone.id) {
            milestone.status = p.status;
            milestone.is_completed = p.status == ProgressStatus::Completed;
            milestone.progress_id = Some(p.id);
            milestone.submission_url = p.submission_url;
            milestone.submission_notes = p.submission_notes;
            milestone.mentor_feedback = p.mentor_feedback;
            milestone.submitted_at = p.submitted_at;
            milestone.completed_at = p.completed_at;
        }
    }

    let total_count = milestones.len();
    let completed_count = milestones.iter().filter(|m| m.is_completed).count();
    Ok(RoadmapView {
        user_id: user_id.to_string(),
        path,
        milestones,
        completed_count,
        total_count,
        completion_percentage: completion_percentage(completed_count, total_count),
    })
}

/// Resolve the path for `trait_code` and overlay `user_id`'s progress.
pub fn resolve_roadmap(
    store: &Store,
    user_id: &str,
    trait_code: &str,
) -> Result<RoadmapView, error::TechPathError> {
    let code = trait_code.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(error::TechPathError::ValidationError(
            "trait code must not be empty".to_string(),
        ));
    }
    store.broker().read(|conn| {
        let path = select_path(conn, &code)?.ok_or_else(|| {
            error::TechPathError::NotFound(format!("No career path found for '{}'", code))
        })?;
        debug!(user = user_id, code = %code, path = %path.trait_code, "roadmap resolved");
        build_view(conn, user_id, path)
    })
}

/// Resolve from the user's latest assessment, applying the configured fallback when no path
/// matches the assessed code.
pub fn roadmap_for_user(store: &Store, user_id: &str) -> Result<RoadmapView, error::TechPathError> {
    users::get_user(store, user_id)?;
    let result = assessment::latest_result(store, user_id)?.ok_or_else(|| {
        error::TechPathError::NotFound(format!("User '{}' has not taken an assessment", user_id))
    })?;

    match resolve_roadmap(store, user_id, &result.blended_code) {
        Err(error::TechPathError::NotFound(msg)) => match store.config.roadmap.fallback {
            RoadmapFallback::None => Err(error::TechPathError::NotFound(msg)),
            RoadmapFallback::FirstPath => store.broker().read(|conn| {
                let path = catalog::first_path(conn)?.ok_or_else(|| {
                    error::TechPathError::NotFound("The catalog has no career paths".to_string())
                })?;
                debug!(user = user_id, path = %path.trait_code, "roadmap fell back to first path");
                build_view(conn, user_id, path)
            }),
        },
        other => other,
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "roadmap",
        "version": "0.1.0",
        "description": "Trait code to career path resolution with a per-user progress overlay",
        "commands": [
            { "name": "show", "parameters": ["user", "code"] },
            { "name": "mine", "parameters": ["user"] }
        ]
    })
}

pub fn run_roadmap_cli(store: &Store, cli: RoadmapCli) -> Result<(), error::TechPathError> {
    match cli.command {
        RoadmapCommand::Show { user, code } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&resolve_roadmap(store, &user.id, &code)?)?;
        }
        RoadmapCommand::Mine { user } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&roadmap_for_user(store, &user.id)?)?;
        }
    }
    Ok(())
}
