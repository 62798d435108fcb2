use crate::core::db;
use crate::core::error;
use crate::core::pool::{self, global_pool};
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const AUDIT_LOG_NAME: &str = "audit.events.jsonl";

/// The Broker is the single entry point for state access.
/// Writes are serialized and audited; reads go straight to a WAL reader.
pub struct Broker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub status: String,
}

impl Broker {
    pub fn new(root: &Path) -> Self {
        Self {
            db_path: db::techpath_db_path(root),
            audit_log_path: root.join(AUDIT_LOG_NAME),
        }
    }

    /// Run `f` inside one write transaction and record the outcome in the audit log.
    pub fn write<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, error::TechPathError>
    where
        F: FnOnce(&Connection) -> Result<R, error::TechPathError>,
    {
        let result = global_pool().with_write(&self.db_path, f);

        let status = match &result {
            Ok(_) => "success",
            Err(e) if pool::is_busy_error(e) => "busy",
            Err(e) if e.is_caller_error() => "rejected",
            Err(_) => "error",
        };
        debug!(actor, op = op_name, status, "brokered write");
        // The audit trail is best-effort; the transaction outcome stands either way.
        if let Err(e) = self.log_event(actor, op_name, status) {
            warn!(op = op_name, error = %e, "failed to append audit event");
        }

        result
    }

    pub fn read<F, R>(&self, f: F) -> Result<R, error::TechPathError>
    where
        F: FnOnce(&Connection) -> Result<R, error::TechPathError>,
    {
        global_pool().with_read(&self.db_path, f)
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), error::TechPathError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::TechPathError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::TechPathError::IoError)?;
        Ok(())
    }

    /// Read back the audit log, oldest first.
    pub fn audit_events(&self) -> Result<Vec<BrokerEvent>, error::TechPathError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.audit_log_path)?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized, audited state mutation layer",
        "commands": [
            { "name": "audit", "description": "Show the mutation audit log" }
        ],
        "storage": [AUDIT_LOG_NAME]
    })
}
