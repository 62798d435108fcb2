//! Subsystems: each owns its tables, its operations, and its CLI group.

pub mod achievements;
pub mod assessment;
pub mod catalog;
pub mod dashboard;
pub mod mentorship;
pub mod notifications;
pub mod progress;
pub mod roadmap;
pub mod users;
