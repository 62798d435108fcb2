//! Subsystem registration: every table initializer, in foreign-key order.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::core::error;
use crate::plugins::{
    achievements, assessment, catalog, mentorship, notifications, progress, users,
};
use std::path::Path;

pub struct SubsystemInit {
    pub name: &'static str,
    pub initialize_db: fn(&Path) -> Result<(), error::TechPathError>,
}

/// Referenced tables come before the tables that point at them.
pub const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit {
        name: "users",
        initialize_db: users::initialize_users_db,
    },
    SubsystemInit {
        name: "assessment",
        initialize_db: assessment::initialize_assessment_db,
    },
    SubsystemInit {
        name: "catalog",
        initialize_db: catalog::initialize_catalog_db,
    },
    SubsystemInit {
        name: "progress",
        initialize_db: progress::initialize_progress_db,
    },
    SubsystemInit {
        name: "mentorship",
        initialize_db: mentorship::initialize_mentorship_db,
    },
    SubsystemInit {
        name: "notifications",
        initialize_db: notifications::initialize_notifications_db,
    },
    SubsystemInit {
        name: "achievements",
        initialize_db: achievements::initialize_achievements_db,
    },
];

/// Create every subsystem's tables. Safe to call on an initialized store.
pub fn initialize_all(root: &Path) -> Result<(), error::TechPathError> {
    for sub in SUBSYSTEMS {
        tracing::debug!(subsystem = sub.name, "initializing tables");
        (sub.initialize_db)(root)?;
    }
    Ok(())
}
