//! SQLite connection handling with serialized writers.
//!
//! - Maintains a **write mutex** per DB for serialized in-process write access
//! - Runs every write inside a `BEGIN IMMEDIATE` transaction so read-modify-write is atomic
//! - Creates fresh **read connections** per operation (no mutex, concurrent via WAL)
//! - Relies on `busy_timeout` to absorb cross-process contention
//!
//! Connections are opened fresh each time rather than cached.

use crate::core::db;
use crate::core::error::TechPathError;
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Write connection busy_timeout in seconds.
const WRITE_BUSY_TIMEOUT_SECS: u64 = 30;
/// Read connection busy_timeout in seconds.
const READ_BUSY_TIMEOUT_SECS: u64 = 15;

/// Per-database entry holding a write mutex for serialized write access.
struct PoolEntry {
    write_lock: Mutex<()>,
    db_path: PathBuf,
}

/// Read/write access per SQLite database file.
pub struct SqlitePool {
    entries: Mutex<HashMap<PathBuf, &'static PoolEntry>>,
}

impl SqlitePool {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_entry(&self, db_path: &Path) -> Result<&'static PoolEntry, TechPathError> {
        let key = db_path.to_path_buf();
        let mut entries = self.entries.lock().map_err(|_| {
            TechPathError::ConfigError("SqlitePool entries lock poisoned".to_string())
        })?;
        if let Some(entry) = entries.get(&key) {
            return Ok(*entry);
        }
        // One entry per database file for the life of the process.
        let entry = Box::leak(Box::new(PoolEntry {
            write_lock: Mutex::new(()),
            db_path: key.clone(),
        }));
        entries.insert(key, entry);
        Ok(entry)
    }

    /// Execute a closure inside an immediate write transaction for the given DB path.
    ///
    /// The transaction commits only when the closure returns `Ok`; any error rolls back every
    /// statement the closure executed.
    pub fn with_write<F, R>(&self, db_path: &Path, f: F) -> Result<R, TechPathError>
    where
        F: FnOnce(&Connection) -> Result<R, TechPathError>,
    {
        let entry = self.get_entry(db_path)?;
        let _guard = entry
            .write_lock
            .lock()
            .map_err(|_| TechPathError::ConfigError("Pool write lock poisoned".to_string()))?;

        let mut conn =
            db::db_connect_with_timeout(&entry.db_path.to_string_lossy(), WRITE_BUSY_TIMEOUT_SECS)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Execute a closure with a read connection (no mutex serialization).
    pub fn with_read<F, R>(&self, db_path: &Path, f: F) -> Result<R, TechPathError>
    where
        F: FnOnce(&Connection) -> Result<R, TechPathError>,
    {
        let conn = db::db_connect_with_timeout(&db_path.to_string_lossy(), READ_BUSY_TIMEOUT_SECS)?;
        f(&conn)
    }
}

/// Check if an error is a SQLite busy/locked error.
pub fn is_busy_error(err: &TechPathError) -> bool {
    match err {
        TechPathError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Check if an error is a UNIQUE/constraint violation.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Global pool instance (same lifetime as the process).
pub fn global_pool() -> &'static SqlitePool {
    static POOL: OnceLock<SqlitePool> = OnceLock::new();
    POOL.get_or_init(SqlitePool::new)
}
