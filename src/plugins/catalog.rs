//! Career path catalog: paths, their ordered milestones, and attached learning resources.
//!
//! The catalog is curated content. It is loaded from a TOML file with `techpath catalog seed`,
//! which upserts paths by trait code and milestones by (path, title) so re-seeding is safe.

use crate::core::broker::Broker;
use crate::core::error;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::assessment::Trait;
use crate::plugins::{roadmap, users};
use clap::{Parser, Subcommand};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Video,
    #[default]
    Doc,
    Course,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Video => "VIDEO",
            ResourceType::Doc => "DOC",
            ResourceType::Course => "COURSE",
        }
    }
}

impl FromStr for ResourceType {
    type Err = error::TechPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VIDEO" => Ok(ResourceType::Video),
            "DOC" => Ok(ResourceType::Doc),
            "COURSE" => Ok(ResourceType::Course),
            other => Err(error::TechPathError::ValidationError(format!(
                "Unknown resource type '{}'",
                other
            ))),
        }
    }
}

impl ToSql for ResourceType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ResourceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: error::TechPathError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CareerPath {
    pub id: String,
    pub trait_code: String,
    pub title: String,
    pub description: String,
    pub duration: String,
}

impl CareerPath {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            trait_code: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            duration: row.get(4)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Milestone {
    pub id: String,
    pub path_id: String,
    pub title: String,
    pub order: i64,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LearningResource {
    pub id: String,
    pub milestone_id: String,
    pub title: String,
    pub url: String,
    pub resource_type: ResourceType,
    pub category: String,
}

pub(crate) const PATH_COLUMNS: &str = "id, trait_code, title, description, duration";

// --- Catalog file ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Catalog {
    #[serde(default)]
    pub paths: Vec<PathSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathSpec {
    pub trait_code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub milestones: Vec<MilestoneSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MilestoneSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceSpec {
    pub title: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub paths: usize,
    pub milestones: usize,
    pub resources: usize,
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "catalog", about = "Load and inspect career paths, milestones, and resources.")]
pub struct CatalogCli {
    #[clap(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Upsert paths/milestones/resources from a TOML catalog file.
    Seed {
        #[clap(long)]
        file: PathBuf,
    },
    /// List every career path with its milestone count.
    Paths,
    /// Learning resources of the user's resolved path.
    Library {
        #[clap(long)]
        user: String,
    },
}

// --- Storage ---

pub fn initialize_catalog_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "catalog.init", |conn| {
        conn.execute_batch(schemas::CATALOG_DB_SCHEMA)?;
        Ok(())
    })
}

/// Normalize a 1- or 2-letter path code made of RIASEC letters.
pub fn normalize_trait_code(code: &str) -> Result<String, error::TechPathError> {
    let code = code.trim().to_ascii_uppercase();
    let valid_len = (1..=2).contains(&code.chars().count());
    let valid_letters = code
        .chars()
        .all(|c| Trait::from_code(&c.to_string()).is_some());
    if !valid_len || !valid_letters {
        return Err(error::TechPathError::ValidationError(format!(
            "'{}' is not a RIASEC trait code (one or two of R, I, A, S, E, C)",
            code
        )));
    }
    Ok(code)
}

pub fn load_catalog_file(path: &Path) -> Result<Catalog, error::TechPathError> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

pub fn parse_catalog(content: &str) -> Result<Catalog, error::TechPathError> {
    toml::from_str(content).map_err(|e| {
        error::TechPathError::ValidationError(format!("invalid catalog file: {}", e))
    })
}

/// Upsert every path in `catalog`. Resources of each seeded milestone are replaced.
pub fn seed_catalog(store: &Store, catalog: &Catalog) -> Result<SeedSummary, error::TechPathError> {
    // Validate everything before the first write.
    let mut codes = Vec::with_capacity(catalog.paths.len());
    for path in &catalog.paths {
        codes.push(normalize_trait_code(&path.trait_code)?);
        if path.title.trim().is_empty() {
            return Err(error::TechPathError::ValidationError(format!(
                "path '{}' needs a title",
                path.trait_code
            )));
        }
    }

    let summary = store.broker().write("admin", "catalog.seed", |conn| {
        let mut summary = SeedSummary::default();
        for (path, code) in catalog.paths.iter().zip(&codes) {
            conn.execute(
                "INSERT INTO career_paths(id, trait_code, title, description, duration, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(trait_code) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    duration = excluded.duration",
                params![
                    time::new_id("CP"),
                    code,
                    path.title,
                    path.description,
                    path.duration,
                    time::now_epoch_z()
                ],
            )?;
            let path_id: String = conn.query_row(
                "SELECT id FROM career_paths WHERE trait_code = ?1",
                params![code],
                |row| row.get(0),
            )?;
            summary.paths += 1;

            for (index, milestone) in path.milestones.iter().enumerate() {
                conn.execute(
                    "INSERT INTO milestones(id, path_id, title, description, sort_order)
                     VALUES(?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(path_id, title) DO UPDATE SET
                        description = excluded.description,
                        sort_order = excluded.sort_order",
                    params![
                        time::new_id("MS"),
                        path_id,
                        milestone.title,
                        milestone.description,
                        index as i64
                    ],
                )?;
                let milestone_id: String = conn.query_row(
                    "SELECT id FROM milestones WHERE path_id = ?1 AND title = ?2",
                    params![path_id, milestone.title],
                    |row| row.get(0),
                )?;
                summary.milestones += 1;

                conn.execute(
                    "DELETE FROM learning_resources WHERE milestone_id = ?1",
                    params![milestone_id],
                )?;
                for resource in &milestone.resources {
                    conn.execute(
                        "INSERT INTO learning_resources(id, milestone_id, title, url, resource_type, category)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            time::new_id("LR"),
                            milestone_id,
                            resource.title,
                            resource.url,
                            resource.resource_type,
                            resource.category
                        ],
                    )?;
                    summary.resources += 1;
                }
            }
        }
        Ok(summary)
    })?;

    info!(
        paths = summary.paths,
        milestones = summary.milestones,
        resources = summary.resources,
        "catalog seeded"
    );
    Ok(summary)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PathSummary {
    #[serde(flatten)]
    pub path: CareerPath,
    pub milestone_count: i64,
}

pub fn list_paths(store: &Store) -> Result<Vec<PathSummary>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.trait_code, p.title, p.description, p.duration, COUNT(m.id)
             FROM career_paths p
             LEFT JOIN milestones m ON m.path_id = p.id
             GROUP BY p.id
             ORDER BY p.created_at, p.rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PathSummary {
                    path: CareerPath::from_row(row)?,
                    milestone_count: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// The first path in catalog order, used as a last-resort default.
pub(crate) fn first_path(conn: &Connection) -> Result<Option<CareerPath>, error::TechPathError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM career_paths ORDER BY created_at, rowid LIMIT 1",
                PATH_COLUMNS
            ),
            [],
            CareerPath::from_row,
        )
        .optional()?)
}

/// Load a milestone together with the path that owns it.
pub(crate) fn load_milestone(
    conn: &Connection,
    milestone_id: &str,
) -> Result<(Milestone, CareerPath), error::TechPathError> {
    conn.query_row(
        "SELECT m.id, m.path_id, m.title, m.sort_order, m.description,
                p.id, p.trait_code, p.title, p.description, p.duration
         FROM milestones m JOIN career_paths p ON p.id = m.path_id
         WHERE m.id = ?1",
        params![milestone_id],
        |row| {
            Ok((
                Milestone {
                    id: row.get(0)?,
                    path_id: row.get(1)?,
                    title: row.get(2)?,
                    order: row.get(3)?,
                    description: row.get(4)?,
                },
                CareerPath {
                    id: row.get(5)?,
                    trait_code: row.get(6)?,
                    title: row.get(7)?,
                    description: row.get(8)?,
                    duration: row.get(9)?,
                },
            ))
        },
    )
    .optional()?
    .ok_or_else(|| {
        error::TechPathError::NotFound(format!("Milestone '{}' not found", milestone_id))
    })
}

pub fn path_for_milestone(
    store: &Store,
    milestone_id: &str,
) -> Result<CareerPath, error::TechPathError> {
    store
        .broker()
        .read(|conn| load_milestone(conn, milestone_id).map(|(_, path)| path))
}

/// Every resource of the user's resolved roadmap, in milestone order.
pub fn library_for_user(
    store: &Store,
    user_id: &str,
) -> Result<Vec<LearningResource>, error::TechPathError> {
    let view = roadmap::roadmap_for_user(store, user_id)?;
    Ok(view
        .milestones
        .into_iter()
        .flat_map(|m| m.resources)
        .collect())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "catalog",
        "version": "0.1.0",
        "description": "Career paths keyed by trait code, ordered milestones, learning resources",
        "commands": [
            { "name": "seed", "parameters": ["file"] },
            { "name": "paths", "description": "List career paths" },
            { "name": "library", "parameters": ["user"] }
        ],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_catalog_cli(store: &Store, cli: CatalogCli) -> Result<(), error::TechPathError> {
    match cli.command {
        CatalogCommand::Seed { file } => {
            let catalog = load_catalog_file(&file)?;
            let summary = seed_catalog(store, &catalog)?;
            output::print_json(&time::command_envelope(
                "catalog.seed",
                "ok",
                serde_json::to_value(summary)?,
            ))?;
        }
        CatalogCommand::Paths => {
            output::print_json(&list_paths(store)?)?;
        }
        CatalogCommand::Library { user } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&library_for_user(store, &user.id)?)?;
        }
    }
    Ok(())
}
