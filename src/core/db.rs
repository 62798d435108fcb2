use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default busy timeout for ad-hoc connections.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, error::TechPathError> {
    db_connect_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_SECS)
}

/// Open a connection with WAL journaling, foreign keys on, and the given busy timeout.
pub fn db_connect_with_timeout(
    db_path: &str,
    busy_timeout_secs: u64,
) -> Result<Connection, error::TechPathError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))
        .map_err(error::TechPathError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::TechPathError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::TechPathError::RusqliteError)?;
    Ok(conn)
}

pub fn techpath_db_path(root: &Path) -> PathBuf {
    root.join(schemas::TECHPATH_DB_NAME)
}

// Subsystems own their tables and initialization; they all share one database file so that
// cross-entity transitions (progress + roster + badges) stay in a single transaction scope.
