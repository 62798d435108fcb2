//! Core modules: storage access, configuration, errors, and the shared primitives every
//! subsystem builds on.

pub mod authz;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod output;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
