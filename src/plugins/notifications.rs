//! In-app notices: the default [`NotificationSink`] plus the recipient-facing inbox.

use crate::core::broker::Broker;
use crate::core::error;
use crate::core::notify::NotificationSink;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

impl Notification {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            message: row.get(2)?,
            is_read: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Sink that appends notices to the store's `notifications` table.
///
/// Each notice is its own brokered write, so it never shares a transaction with the
/// transition that produced it.
pub struct StoreNotifier {
    root: PathBuf,
}

impl StoreNotifier {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl NotificationSink for StoreNotifier {
    fn notify(&self, recipient_id: &str, message: &str) -> Result<(), error::TechPathError> {
        Broker::new(&self.root).write("techpath", "notifications.post", |conn| {
            conn.execute(
                "INSERT INTO notifications(id, recipient_id, message, is_read, created_at)
                 VALUES(?1, ?2, ?3, 0, ?4)",
                params![time::new_id("NT"), recipient_id, message, time::now_epoch_z()],
            )?;
            Ok(())
        })
    }
}

// --- CLI ---

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "notify", about = "Read and acknowledge in-app notices.")]
pub struct NotifyCli {
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: NotifyCommand,
}

#[derive(Subcommand, Debug)]
pub enum NotifyCommand {
    /// List a user's notices, newest first.
    List {
        #[clap(long)]
        user: String,
        #[clap(long)]
        unread: bool,
    },
    /// Mark one notice as read.
    Read {
        #[clap(long)]
        user: String,
        #[clap(long)]
        id: String,
    },
    /// Mark every notice for a user as read.
    ReadAll {
        #[clap(long)]
        user: String,
    },
}

// --- Storage ---

pub fn initialize_notifications_db(root: &Path) -> Result<(), error::TechPathError> {
    Broker::new(root).write("techpath", "notifications.init", |conn| {
        conn.execute_batch(schemas::NOTIFICATIONS_DB_SCHEMA)?;
        Ok(())
    })
}

pub fn list_notifications(
    store: &Store,
    user_id: &str,
    unread_only: bool,
) -> Result<Vec<Notification>, error::TechPathError> {
    store.broker().read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, recipient_id, message, is_read, created_at
             FROM notifications
             WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id, unread_only], Notification::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn unread_count(store: &Store, user_id: &str) -> Result<i64, error::TechPathError> {
    store.broker().read(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?)
    })
}

/// Mark a notice read. Notices addressed to someone else are reported as missing.
pub fn mark_read(
    store: &Store,
    user_id: &str,
    notification_id: &str,
) -> Result<(), error::TechPathError> {
    store.broker().write(user_id, "notifications.read", |conn| {
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![notification_id, user_id],
        )?;
        if changed == 0 {
            return Err(error::TechPathError::NotFound(format!(
                "Notification '{}' not found",
                notification_id
            )));
        }
        Ok(())
    })
}

/// Returns how many notices flipped to read.
pub fn mark_all_read(store: &Store, user_id: &str) -> Result<usize, error::TechPathError> {
    store.broker().write(user_id, "notifications.read_all", |conn| {
        Ok(conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            params![user_id],
        )?)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "notifications",
        "version": "0.1.0",
        "description": "Fire-and-forget in-app notices",
        "commands": [
            { "name": "list", "parameters": ["user", "unread"] },
            { "name": "read", "parameters": ["user", "id"] },
            { "name": "read-all", "parameters": ["user"] }
        ],
        "storage": [schemas::TECHPATH_DB_NAME]
    })
}

pub fn run_notify_cli(store: &Store, cli: NotifyCli) -> Result<(), error::TechPathError> {
    use colored::Colorize;

    match cli.command {
        NotifyCommand::List { user, unread } => {
            let items = list_notifications(store, &user, unread)?;
            match cli.format {
                OutputFormat::Json => output::print_json(&items)?,
                OutputFormat::Text => {
                    if items.is_empty() {
                        println!("No notifications.");
                        return Ok(());
                    }
                    for n in &items {
                        let marker = if n.is_read {
                            " ".normal()
                        } else {
                            "*".yellow().bold()
                        };
                        println!(
                            "{} {} {}",
                            marker,
                            n.id.dimmed(),
                            output::compact_line(&n.message, 100)
                        );
                    }
                }
            }
        }
        NotifyCommand::Read { user, id } => {
            mark_read(store, &user, &id)?;
            output::print_json(&time::command_envelope(
                "notify.read",
                "ok",
                serde_json::json!({ "id": id }),
            ))?;
        }
        NotifyCommand::ReadAll { user } => {
            let marked = mark_all_read(store, &user)?;
            output::print_json(&time::command_envelope(
                "notify.read_all",
                "ok",
                serde_json::json!({ "marked": marked }),
            ))?;
        }
    }
    Ok(())
}
