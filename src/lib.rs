//! TechPath: a local-first mentorship engine.
//!
//! Students take a RIASEC interest assessment, get a career roadmap matched to their trait code,
//! and work through its milestones. Mentors accept students onto their roster and review
//! milestone submissions; approvals earn badges.
//!
//! # Architecture
//!
//! All state lives in one SQLite file under a store directory (normally `.techpath/`).
//! Every mutation goes through [`core::broker::Broker`], which serializes writers, runs the
//! change inside one immediate transaction, and appends to `audit.events.jsonl`.
//!
//! Side effects of a transition (notices, badge evaluation) run after its transaction commits and
//! never undo it.
//!
//! ## Subsystems (Plugins)
//!
//! - `users`: user directory and roles
//! - `assessment`: RIASEC scoring and stored results
//! - `catalog`: career paths, milestones, learning resources
//! - `roadmap`: trait code to path resolution with a progress overlay
//! - `progress`: submission/review state machine
//! - `mentorship`: connection requests, rosters, conversation threads
//! - `achievements`: milestone badges and the leaderboard
//! - `notifications`: in-app notices
//! - `dashboard`: the student home view
//!
//! # Examples
//!
//! ```bash
//! techpath init --catalog project/seed/catalog.toml
//! techpath user add --username ada --email ada@example.com
//! techpath assess submit --user ada --answers '[{"traitCode":"I","value":1}]'
//! techpath roadmap mine --user ada
//! ```

pub mod core;
pub mod plugins;
pub mod subsystems;

mod cli;

use crate::cli::{AuditCli, Cli, Command, InitCli, SchemaCli};
use crate::core::config::{self, Config};
use crate::core::store::{self, Store};
use crate::core::{broker, db, error, logging, output, time};
use crate::plugins::{
    achievements, assessment, catalog, dashboard, mentorship, notifications, progress, roadmap,
    users,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, error::TechPathError> {
    match explicit {
        Some(root) => Ok(root),
        None => store::find_store_root(&std::env::current_dir()?),
    }
}

fn run_init(root: &Path, init: InitCli) -> Result<(), error::TechPathError> {
    std::fs::create_dir_all(root)?;
    let config_file = config::config_path(root);
    let wrote_config = !config_file.exists();
    if wrote_config {
        std::fs::write(&config_file, Config::default().to_toml()?)?;
    }

    let store = Store::open(root)?;
    logging::init(&store.config.logging);
    subsystems::initialize_all(root)?;
    info!(root = %root.display(), "store initialized");

    let seeded = match init.catalog {
        Some(file) => {
            let catalog = catalog::load_catalog_file(&file)?;
            Some(catalog::seed_catalog(&store, &catalog)?)
        }
        None => None,
    };

    output::print_json(&time::command_envelope(
        "init",
        "ok",
        serde_json::json!({
            "root": root.display().to_string(),
            "config_written": wrote_config,
            "catalog": seeded,
        }),
    ))
}

fn run_audit(store: &Store, audit: AuditCli) -> Result<(), error::TechPathError> {
    let mut events = store.broker().audit_events()?;
    if let Some(limit) = audit.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    output::print_json(&events)
}

fn all_schemas() -> BTreeMap<&'static str, serde_json::Value> {
    let mut schemas = BTreeMap::new();
    schemas.insert("broker", broker::schema());
    schemas.insert("users", users::schema());
    schemas.insert("assessment", assessment::schema());
    schemas.insert("catalog", catalog::schema());
    schemas.insert("roadmap", roadmap::schema());
    schemas.insert("dashboard", dashboard::schema());
    schemas.insert("progress", progress::schema());
    schemas.insert("mentorship", mentorship::schema());
    schemas.insert("notifications", notifications::schema());
    schemas.insert("achievements", achievements::schema());
    schemas
}

fn run_schema(schema: SchemaCli) -> Result<(), error::TechPathError> {
    let schemas = all_schemas();
    let out = match schema.subsystem {
        Some(sub) => schemas.get(sub.as_str()).cloned().ok_or_else(|| {
            error::TechPathError::NotFound(format!("Subsystem '{}' not found", sub))
        })?,
        None => serde_json::json!({
            "schema_version": "1.0.0",
            "subsystems": schemas
        }),
    };
    output::print_json(&out)
}

pub fn run() -> Result<(), error::TechPathError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Schema(schema) => return run_schema(schema),
        Command::Init(init) => {
            let root = match cli.root {
                Some(root) => root,
                None => std::env::current_dir()?.join(store::STORE_DIR_NAME),
            };
            return run_init(&root, init);
        }
        _ => {}
    }

    let root = resolve_root(cli.root)?;
    let store = Store::open(&root)?;
    logging::init(&store.config.logging);
    if !db::techpath_db_path(&root).exists() {
        subsystems::initialize_all(&root)?;
    }

    match cli.command {
        Command::User(c) => users::run_user_cli(&store, c),
        Command::Catalog(c) => catalog::run_catalog_cli(&store, c),
        Command::Assess(c) => assessment::run_assess_cli(&store, c),
        Command::Roadmap(c) => roadmap::run_roadmap_cli(&store, c),
        Command::Dashboard(c) => dashboard::run_dashboard_cli(&store, c),
        Command::Progress(c) => progress::run_progress_cli(&store, c),
        Command::Mentor(c) => mentorship::run_mentor_cli(&store, c),
        Command::Notify(c) => notifications::run_notify_cli(&store, c),
        Command::Badge(c) => achievements::run_badge_cli(&store, c),
        Command::Audit(c) => run_audit(&store, c),
        Command::Version | Command::Schema(_) | Command::Init(_) => Ok(()),
    }
}
