//! Store configuration, read from `<root>/config.toml`.
//!
//! Every field has a default so a missing file or a partial file is valid.

use crate::core::error::TechPathError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub roadmap: RoadmapConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub achievements: AchievementsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// What the dashboard shows when no path matches the user's trait code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoadmapFallback {
    /// Show the first path in the catalog.
    FirstPath,
    /// Show nothing.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapConfig {
    #[serde(default = "default_fallback")]
    pub fallback: RoadmapFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressConfig {
    /// Allow the direct completion toggle alongside mentor review.
    #[serde(default = "default_true")]
    pub allow_toggle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementsConfig {
    /// Completed milestones in one path needed for the path specialist badge.
    #[serde(default = "default_specialist_threshold")]
    pub specialist_threshold: u32,
}

fn default_log_filter() -> String {
    "techpath=info".to_string()
}

fn default_fallback() -> RoadmapFallback {
    RoadmapFallback::FirstPath
}

fn default_true() -> bool {
    true
}

fn default_specialist_threshold() -> u32 {
    3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for RoadmapConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            allow_toggle: true,
        }
    }
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self {
            specialist_threshold: default_specialist_threshold(),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

impl Config {
    /// Load `<root>/config.toml`; a missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self, TechPathError> {
        let path = config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, TechPathError> {
        let config: Config =
            toml::from_str(content).map_err(|e| TechPathError::ConfigError(e.to_string()))?;
        if config.achievements.specialist_threshold == 0 {
            return Err(TechPathError::ConfigError(
                "achievements.specialist_threshold must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, TechPathError> {
        toml::to_string_pretty(self).map_err(|e| TechPathError::ConfigError(e.to_string()))
    }
}
