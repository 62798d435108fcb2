//! CLI struct definitions for the `techpath` command-line interface.
//!
//! Subsystem command groups are defined next to their subsystem; this file assembles them.

use crate::plugins::{
    achievements, assessment, catalog, dashboard, mentorship, notifications, progress, roadmap,
    users,
};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "techpath",
    version = env!("CARGO_PKG_VERSION"),
    about = "TechPath scores RIASEC assessments, resolves career roadmaps, and runs mentor-reviewed milestone progress.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Store directory. Defaults to the nearest `.techpath` in the current or a parent directory.
    #[clap(long, global = true, env = "TECHPATH_ROOT")]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Seed the catalog from this TOML file after creating the tables.
    #[clap(long)]
    pub catalog: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AuditCli {
    /// Only show the most recent N events.
    #[clap(long)]
    pub limit: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SchemaCli {
    /// Optional: filter by subsystem name
    #[clap(long)]
    pub subsystem: Option<String>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store, its configuration, and all tables.
    Init(InitCli),
    /// Print the binary version.
    Version,
    /// Students, mentors, administrators
    User(users::UserCli),
    /// Career paths, milestones, learning resources
    Catalog(catalog::CatalogCli),
    /// RIASEC assessments
    Assess(assessment::AssessCli),
    /// Career roadmaps with progress
    Roadmap(roadmap::RoadmapCli),
    /// The student home view
    Dashboard(dashboard::DashboardCli),
    /// Milestone submissions and reviews
    Progress(progress::ProgressCli),
    /// Mentorship requests and rosters
    Mentor(mentorship::MentorCli),
    /// In-app notices
    Notify(notifications::NotifyCli),
    /// Badges and the leaderboard
    Badge(achievements::BadgeCli),
    /// Show the write audit log.
    Audit(AuditCli),
    /// Subsystem schemas and discovery
    Schema(SchemaCli),
}
