//! RIASEC trait scoring and assessment results.
//!
//! Scoring is a pure reduction over answers; persisting a result is a single insert of an
//! immutable row. The most recent result is the one roadmaps are resolved from.

use crate::core::broker::Broker;
use crate::core::error;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::users;
use clap::{Parser, Subcommand};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// The six RIASEC traits, declared in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trait {
    Realistic,
    Investigative,
    Artistic,
    Social,
    Enterprising,
    Conventional,
}

/// Equal totals rank in this order.
pub const TRAIT_PRIORITY: [Trait; 6] = [
    Trait::Realistic,
    Trait::Investigative,
    Trait::Artistic,
    Trait::Social,
    Trait::Enterprising,
    Trait::Conventional,
];

impl Trait {
    pub fn code(self) -> char {
        match self {
            Trait::Realistic => 'R',
            Trait::Investigative => 'I',
            Trait::Artistic => 'A',
            Trait::Social => 'S',
            Trait::Enterprising => 'E',
            Trait::Conventional => 'C',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Trait::Realistic => "Realistic",
            Trait::Investigative => "Investigative",
            Trait::Artistic => "Artistic",
            Trait::Social => "Social",
            Trait::Enterprising => "Enterprising",
            Trait::Conventional => "Conventional",
        }
    }

    pub fn from_code(code: &str) -> Option<Trait> {
        let mut chars = code.trim().chars();
        let c = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() {
            return None;
        }
        TRAIT_PRIORITY.iter().copied().find(|t| t.code() == c)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One assessment answer: a trait code and the value it contributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    #[serde(rename = "traitCode", alias = "type", alias = "trait_code")]
    pub trait_code: String,
    #[serde(default)]
    pub value: f64,
}

impl Answer {
    pub fn new(trait_code: &str, value: f64) -> Self {
        Self {
            trait_code: trait_code.to_string(),
            value,
        }
    }
}

/// Per-trait totals. All six traits are always present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct TraitScoreSet {
    totals: [f64; 6],
}

impl TraitScoreSet {
    pub fn get(&self, t: Trait) -> f64 {
        self.totals[t.index()]
    }

    fn add(&mut self, t: Trait, value: f64) {
        self.totals[t.index()] += value;
    }

    /// Traits by descending total; ties keep `TRAIT_PRIORITY` order.
    pub fn ranking(&self) -> [Trait; 6] {
        let mut ranked = TRAIT_PRIORITY;
        // sort_by is stable, so equal totals stay in priority order
        ranked.sort_by(|a, b| self.get(*b).total_cmp(&self.get(*a)));
        ranked
    }

    pub fn primary(&self) -> Trait {
        self.ranking()[0]
    }

    pub fn secondary(&self) -> Trait {
        self.ranking()[1]
    }

    pub fn primary_code(&self) -> String {
        self.primary().code().to_string()
    }

    /// Primary code followed by the secondary code, e.g. `"IA"`.
    pub fn blended_code(&self) -> String {
        let ranked = self.ranking();
        format!("{}{}", ranked[0].code(), ranked[1].code())
    }
}

impl From<BTreeMap<String, f64>> for TraitScoreSet {
    fn from(map: BTreeMap<String, f64>) -> Self {
        let mut set = TraitScoreSet::default();
        for (code, value) in map {
            if let Some(t) = Trait::from_code(&code) {
                set.totals[t.index()] = value;
            }
        }
        set
    }
}

impl From<TraitScoreSet> for BTreeMap<String, f64> {
    fn from(set: TraitScoreSet) -> Self {
        TRAIT_PRIORITY
            .iter()
            .map(|t| (t.code().to_string(), set.get(*t)))
            .collect()
    }
}

/// Reduce raw answers to per-trait totals.
///
/// Unknown trait codes are ignored. Fails when there are no answers, or when a value or a
/// running total is not a finite number (stored scores must round-trip through JSON).
pub fn score_answers(answers: &[Answer]) -> Result<TraitScoreSet, error::TechPathError> {
    if answers.is_empty() {
        return Err(error::TechPathError::ValidationError(
            "No answers provided".to_string(),
        ));
    }
    let mut set = TraitScoreSet::default();
    for answer in answers {
        if let Some(t) = Trait::from_code(&answer.trait_code) {
            if !answer.value.is_finite() {
                return Err(error::TechPathError::ValidationError(format!(
                    "answer value for trait {} is not a finite number",
                    t
                )));
            }
            set.add(t, answer.value);
            if !set.get(t).is_finite() {
                return Err(error::TechPathError::ValidationError(format!(
                    "total for trait {} is out of range",
                    t
                )));
            }
        }
    }
    Ok(set)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AssessmentResult {
    pub id: String,
    pub user_id: String,
    pub scores: TraitScoreSet,
    pub top_trait_code: String,
    pub blended_code: String,
    pub created_at: String,
}

impl AssessmentResult {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let scores_json: String = row.get(2)?;
        let scores = serde_json::from_str(&scores_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            scores,
            top_trait_code: row.get(3)?,
            blended_code: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// What a submission returns to the caller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AssessmentOutcome {
    pub id: String,
    pub scores: TraitScoreSet,
    pub primary_trait_code: String,
    pub primary_trait_name: String,
    pub blended_code: String,
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "assess", about = "Score RIASEC assessments and read stored results.")]
pub struct AssessCli {
    #[clap(subcommand)]
    pub command: AssessCommand,
}

#[derive(Subcommand, Debug)]
pub enum AssessCommand {
    /// Score answers and store the result.
    Submit {
        /// User id or username
        #[clap(long)]
        user: String,
        /// Inline JSON array: [{"traitCode":"I","value":1}, ...]
        #[clap(long, conflicts_with = "file")]
        answers: Option<String>,
        /// JSON file containing the answers array
        #[clap(long)]
        file: Option<PathBuf>,
    },
    /// Show the most recent result for a user.
    Latest {
        #[clap(long)]
        user: String,
    },
    /// Show every stored result for a user, newest first.
    History {
        #[clap(long)]
        user: String,
    },
}

// --- Storage ---

pub fn initialize_assessment_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "assessment.init", |conn| {
        conn.execute_batch(schemas::ASSESSMENT_DB_SCHEMA)?;
        Ok(())
    })
}

/// Score answers and persist an immutable result for the user.
pub fn submit_assessment(
    store: &Store,
    user_id: &str,
    answers: &[Answer],
) -> Result<AssessmentOutcome, error::TechPathError> {
    // Rejected before anything is persisted.
    let scores = score_answers(answers)?;
    let scores_json = serde_json::to_string(&scores)?;
    let primary = scores.primary();
    let blended = scores.blended_code();
    let id = time::new_id("AR");
    let now = time::now_epoch_z();

    store.broker().write(user_id, "assessment.submit", |conn| {
        users::load_user(conn, user_id)?;
        conn.execute(
            "INSERT INTO assessment_results(id, user_id, scores_json, top_trait_code, blended_code, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, user_id, scores_json, primary.code().to_string(), blended, now],
        )?;
        Ok(())
    })?;

    info!(user = user_id, primary = %primary, blended = %blended, "assessment scored");
    Ok(AssessmentOutcome {
        id,
        scores,
        primary_trait_code: primary.code().to_string(),
        primary_trait_name: primary.name().to_string(),
        blended_code: blended,
    })
}

const RESULT_COLUMNS: &str = "id, user_id, scores_json, top_trait_code, blended_code, created_at";

pub fn latest_result(
    store: &Store,
    user_id: &str,
) -> Result<Option<AssessmentResult>, error::TechPathError> {
    store.broker().read(|conn| {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM assessment_results WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    RESULT_COLUMNS
                ),
                params![user_id],
                AssessmentResult::from_row,
            )
            .optional()?)
    })
}

pub fn list_results(
    store: &Store,
    user_id: &str,
) -> Result<Vec<AssessmentResult>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM assessment_results WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            RESULT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], AssessmentResult::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn parse_answers(json: &str) -> Result<Vec<Answer>, error::TechPathError> {
    serde_json::from_str(json).map_err(|e| {
        error::TechPathError::ValidationError(format!("answers must be a JSON array: {}", e))
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "assess",
        "version": "0.1.0",
        "description": "RIASEC trait scoring with immutable assessment results",
        "commands": [
            { "name": "submit", "parameters": ["user", "answers|file"] },
            { "name": "latest", "parameters": ["user"] },
            { "name": "history", "parameters": ["user"] }
        ],
        "tie_break": TRAIT_PRIORITY.iter().map(|t| t.code().to_string()).collect::<Vec<_>>(),
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_assess_cli(store: &Store, cli: AssessCli) -> Result<(), error::TechPathError> {
    match cli.command {
        AssessCommand::Submit {
            user,
            answers,
            file,
        } => {
            let user = users::resolve_user(store, &user)?;
            let raw = match (answers, file) {
                (Some(inline), _) => inline,
                (None, Some(path)) => std::fs::read_to_string(&path)?,
                (None, None) => {
                    return Err(error::TechPathError::ValidationError(
                        "provide --answers or --file".to_string(),
                    ));
                }
            };
            let outcome = submit_assessment(store, &user.id, &parse_answers(&raw)?)?;
            output::print_json(&outcome)?;
        }
        AssessCommand::Latest { user } => {
            let user = users::resolve_user(store, &user)?;
            let result = latest_result(store, &user.id)?.ok_or_else(|| {
                error::TechPathError::NotFound(format!(
                    "No assessment results for '{}'",
                    user.username
                ))
            })?;
            output::print_json(&result)?;
        }
        AssessCommand::History { user } => {
            let user = users::resolve_user(store, &user)?;
            output::print_json(&list_results(store, &user.id)?)?;
        }
    }
    Ok(())
}
