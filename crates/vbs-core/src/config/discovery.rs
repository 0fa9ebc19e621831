//! Configuration discovery and resolution

use super::types::Config;
use crate::home::global_config_path;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const REPO_CONFIG_FILE: &str = ".vbranch-sync.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value parsed but is not usable
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Programmatic overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override the branch CLI binary
    pub cli_binary: Option<String>,
    /// Force every session onto one branch seed
    pub branch_seed_override: Option<String>,
    /// Override the state directory
    pub state_dir: Option<String>,
    /// Additional config file layered above the repo-local one
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Programmatic overrides
/// 2. Environment variables
/// 3. Explicit config file (`overrides.config_path`)
/// 4. Repo-local config (.vbranch-sync.toml in current dir or up to git root)
/// 5. Global config (~/.config/vbranch-sync/config.toml)
/// 6. Defaults
///
/// Files are merged table-by-table before deserializing, so a repo-local file
/// that only sets `[locks] stale_after_secs` keeps every other global value.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut merged = toml::Table::new();

    let global = global_config_path(home_dir);
    if let Some(table) = load_layer(&global) {
        merge_tables(&mut merged, table);
    }

    if let Some(repo_config) = find_repo_local_config(current_dir) {
        if let Some(table) = load_layer(&repo_config) {
            merge_tables(&mut merged, table);
        }
    }

    if let Some(path) = overrides.config_path.as_deref() {
        if let Some(table) = load_layer(path) {
            merge_tables(&mut merged, table);
        }
    }

    let mut config = toml::Value::Table(merged).try_into::<Config>()?;

    apply_env_overrides(&mut config);
    apply_overrides(&mut config, overrides);

    config.validate()?;
    Ok(config)
}

/// Read one TOML layer. Missing files are silent; unreadable or unparseable
/// files, and files whose values do not fit `Config`, are logged and skipped
/// whole so the layers below them still apply.
fn load_layer(path: &Path) -> Option<toml::Table> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Failed to read config at {path:?}: {e}");
            return None;
        }
    };
    let table = match contents.parse::<toml::Table>() {
        Ok(table) => table,
        Err(e) => {
            warn!("Failed to parse config at {path:?}: {e}");
            return None;
        }
    };
    if let Err(e) = toml::Value::Table(table.clone()).try_into::<Config>() {
        warn!("Ignoring config at {path:?}, values do not match the schema: {e}");
        return None;
    }
    Some(table)
}

/// Find repo-local config file
///
/// Searches current directory and parent directories up to git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(REPO_CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

/// Deep-merge `overlay` into `base`; nested tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) {
    if let Some(binary) = non_empty_env("VBS_CLI_BINARY") {
        config.core.cli_binary = binary;
    }
    if let Some(seed) = non_empty_env("VBS_BRANCH_SEED") {
        config.core.branch_seed_override = Some(seed);
    }
    if let Some(model) = non_empty_env("VBS_LLM_MODEL") {
        config.reconcile.llm_model = Some(model);
    }
    if let Some(dir) = non_empty_env("VBS_STATE_DIR") {
        config.core.state_dir = Some(dir);
    }
}

/// Apply programmatic overrides
fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(ref binary) = overrides.cli_binary {
        config.core.cli_binary = binary.clone();
    }
    if let Some(ref seed) = overrides.branch_seed_override {
        config.core.branch_seed_override = Some(seed.clone());
    }
    if let Some(ref dir) = overrides.state_dir {
        config.core.state_dir = Some(dir.clone());
    }
}

impl Config {
    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core.cli_binary.trim().is_empty() {
            return Err(invalid("core.cli_binary cannot be empty"));
        }
        if self.locks.poll_interval_ms == 0 {
            return Err(invalid("locks.poll_interval_ms must be greater than zero"));
        }
        if self.locks.stale_after_secs == 0 {
            return Err(invalid("locks.stale_after_secs must be greater than zero"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs must be greater than zero"));
        }
        if self.notifications.ttl_secs == 0 {
            return Err(invalid("notifications.ttl_secs must be greater than zero"));
        }
        if self.reconcile.max_subject_chars < 16 {
            return Err(invalid("reconcile.max_subject_chars must be at least 16"));
        }
        if self.reconcile.slug_max_words == 0 || self.reconcile.slug_max_chars == 0 {
            return Err(invalid("reconcile slug limits must be greater than zero"));
        }
        if let Err(e) = Regex::new(&self.reconcile.default_branch_pattern) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "reconcile.default_branch_pattern '{}' is not a valid regex: {e}",
                    self.reconcile.default_branch_pattern
                ),
            });
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}
