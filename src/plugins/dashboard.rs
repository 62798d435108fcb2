//! The student home view: assessment, roadmap, badges, and unread notices in one read.

use crate::core::error;
use crate::core::output;
use crate::core::store::Store;
use crate::plugins::achievements::{self, EarnedAchievement};
use crate::plugins::assessment::{self, AssessmentResult};
use crate::plugins::notifications;
use crate::plugins::roadmap::{self, RoadmapView};
use crate::plugins::users::{self, User};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DashboardSummary {
    pub user: User,
    pub latest_assessment: Option<AssessmentResult>,
    /// Absent until the user has an assessment and some path matches.
    pub roadmap: Option<RoadmapView>,
    pub achievements: Vec<EarnedAchievement>,
    /// Badges earned since the dashboard was last shown. Consumed by this call.
    pub new_badges: Vec<EarnedAchievement>,
    pub unread_notifications: i64,
}

#[derive(Parser, Debug)]
#[clap(name = "dashboard", about = "Show a student's home view.")]
pub struct DashboardCli {
    /// User id or username
    #[clap(long)]
    pub user: String,
}

pub fn dashboard_summary(
    store: &Store,
    user_id: &str,
) -> Result<DashboardSummary, error::TechPathError> {
    let user = users::get_user(store, user_id)?;
    let latest_assessment = assessment::latest_result(store, user_id)?;

    let roadmap = if latest_assessment.is_some() {
        match roadmap::roadmap_for_user(store, user_id) {
            Ok(view) => Some(view),
            Err(error::TechPathError::NotFound(msg)) => {
                debug!(user = user_id, reason = %msg, "dashboard without roadmap");
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    Ok(DashboardSummary {
        user,
        latest_assessment,
        roadmap,
        achievements: achievements::list_user_achievements(store, user_id)?,
        new_badges: achievements::take_unnotified(store, user_id)?,
        unread_notifications: notifications::unread_count(store, user_id)?,
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "dashboard",
        "version": "0.1.0",
        "description": "Student home view: latest assessment, roadmap, badges, unread notices",
        "parameters": ["user"],
        "consumes": ["achievements.unnotified"]
    })
}

pub fn run_dashboard_cli(store: &Store, cli: DashboardCli) -> Result<(), error::TechPathError> {
    let user = users::resolve_user(store, &cli.user)?;
    output::print_json(&dashboard_summary(store, &user.id)?)
}
