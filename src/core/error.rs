use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TechPathError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl TechPathError {
    /// Stable machine-readable code for CLI error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            TechPathError::RusqliteError(_) => "storage_error",
            TechPathError::IoError(_) => "io_error",
            TechPathError::JsonError(_) => "json_error",
            TechPathError::ConfigError(_) => "config_error",
            TechPathError::ValidationError(_) => "validation_error",
            TechPathError::Unauthorized(_) => "unauthorized",
            TechPathError::Forbidden(_) => "forbidden",
            TechPathError::Conflict(_) => "conflict",
            TechPathError::NotFound(_) => "not_found",
        }
    }

    /// Caller/input problems as opposed to infrastructure failures.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TechPathError::ValidationError(_)
                | TechPathError::Unauthorized(_)
                | TechPathError::Forbidden(_)
                | TechPathError::Conflict(_)
                | TechPathError::NotFound(_)
        )
    }
}
