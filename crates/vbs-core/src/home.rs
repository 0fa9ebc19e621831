//! Canonical home directory resolution for vbranch-sync
//!
//! Every path that lives outside the workspace (the global config file in
//! particular) is derived from the directory returned here.
//!
//! # Precedence
//!
//! 1. `VBS_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! # Testing
//!
//! Tests MUST set `VBS_HOME` to a temporary directory so they never read the
//! developer's real configuration.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory for vbranch-sync operations.
///
/// # Errors
///
/// Returns an error if `VBS_HOME` is not set AND the platform home directory
/// cannot be determined via `dirs::home_dir()`.
///
/// # Examples
///
/// ```
/// use vbranch_sync_core::home::get_home_dir;
///
/// # fn example() -> anyhow::Result<()> {
/// let home = get_home_dir()?;
/// let config_dir = home.join(".config/vbranch-sync");
/// # let _ = config_dir;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("VBS_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Path of the global configuration file under `home`.
pub fn global_config_path(home: &std::path::Path) -> PathBuf {
    home.join(".config").join("vbranch-sync").join("config.toml")
}
