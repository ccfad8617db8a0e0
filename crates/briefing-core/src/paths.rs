//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::{Path, PathBuf};

use crate::constants::paths;

/// Get the briefing config directory (~/.briefing)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(paths::CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.briefing/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Get the user-level config file (~/.briefing/config.yaml)
pub fn user_config_path() -> PathBuf {
    config_dir().join(paths::CONFIG_FILE_NAME)
}

/// Resolve which config file to load.
///
/// An explicit path always wins. Otherwise `./briefing.yaml` is preferred over
/// the user-level file. Returns `None` when nothing exists.
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = cwd.join(paths::LOCAL_CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    let user = user_config_path();
    user.exists().then_some(user)
}
