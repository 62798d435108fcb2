//! Store handle for TechPath state.
//!
//! A Store is a directory (normally `<project>/.techpath/`) holding the SQLite database, the
//! audit log, and `config.toml`. Every subsystem operation takes a `&Store`.

use crate::core::broker::Broker;
use crate::core::config::Config;
use crate::core::error::TechPathError;
use crate::core::notify::NotificationSink;
use crate::plugins::notifications::StoreNotifier;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory name searched for in the current and parent directories.
pub const STORE_DIR_NAME: &str = ".techpath";

#[derive(Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    pub config: Config,
    notifier: Arc<dyn NotificationSink>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the store rooted at `root` and load its configuration.
    pub fn open(root: &Path) -> Result<Self, TechPathError> {
        fs::create_dir_all(root)?;
        let config = Config::load(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            notifier: Arc::new(StoreNotifier::new(root)),
        })
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the notification sink (e.g. a push gateway, or a test double).
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn notifier(&self) -> &dyn NotificationSink {
        self.notifier.as_ref()
    }

    pub fn broker(&self) -> Broker {
        Broker::new(&self.root)
    }
}

/// Walk up from `start_dir` to the nearest directory containing `.techpath`.
pub fn find_store_root(start_dir: &Path) -> Result<PathBuf, TechPathError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        let candidate = current_dir.join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            return Err(TechPathError::NotFound(format!(
                "'{}' directory not found in current or parent directories. Run `techpath init` first.",
                STORE_DIR_NAME
            )));
        }
    }
}
