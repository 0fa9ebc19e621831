//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core configuration
    #[serde(default)]
    pub core: CoreConfig,
    /// Soft file lock tuning
    #[serde(default)]
    pub locks: LockConfig,
    /// Assignment cache tuning
    #[serde(default)]
    pub cache: CacheConfig,
    /// Operator notification queue tuning
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Branch inference scoring
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Idle reconciliation
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// External command execution
    #[serde(default)]
    pub commands: CommandConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Branch CLI executable (looked up on `PATH` when not absolute)
    pub cli_binary: String,
    /// When set, every session derives its conversation id from this seed
    /// instead of its root session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_seed_override: Option<String>,
    /// Directory for durable state documents (default: `<workspace>/.vbranch-sync`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cli_binary: "but".to_string(),
            branch_seed_override: None,
            state_dir: None,
        }
    }
}

/// Soft file lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Locks older than this are treated as leaked and overridden
    pub stale_after_secs: u64,
    /// Poll interval while waiting for another session's lock
    pub poll_interval_ms: u64,
    /// Give up waiting (and proceed anyway) after this long
    pub acquire_timeout_ms: u64,
    /// Interval of the background stale-lock reaper
    pub reap_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60,
            poll_interval_ms: 100,
            acquire_timeout_ms: 10_000,
            reap_interval_secs: 30,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Assignment cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Notification queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub ttl_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl NotificationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Directory-prefix scoring for ambiguous branch inference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Minimum shared leading-directory depth for a candidate to win
    pub min_prefix_score: usize,
    /// Minimum lead of the best candidate over the runner-up
    pub min_margin: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            min_prefix_score: 1,
            min_margin: 1,
        }
    }
}

/// Idle reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Branch names matching this regex are considered auto-generated
    pub default_branch_pattern: String,
    /// Upper bound on a single LLM message generation
    pub llm_timeout_secs: u64,
    /// Model passed to the host when generating messages (host default if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    /// Maximum length of a generated commit subject line
    pub max_subject_chars: usize,
    /// Maximum words kept in a derived branch slug
    pub slug_max_words: usize,
    /// Maximum length of a derived branch slug
    pub slug_max_chars: usize,
    /// Attempts made to unapply an empty default-named branch
    pub cleanup_max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            default_branch_pattern: r"^(ge-)?branch-\d+$".to_string(),
            llm_timeout_secs: 15,
            llm_model: None,
            max_subject_chars: 72,
            slug_max_words: 5,
            slug_max_chars: 50,
            cleanup_max_attempts: 3,
        }
    }
}

impl ReconcileConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// External branch CLI execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Per-invocation timeout
    pub timeout_secs: u64,
    /// First retry delay; doubles on every further attempt
    pub base_backoff_ms: u64,
    /// Cap on a single retry delay
    pub max_backoff_ms: u64,
    /// Retry budget overrides keyed by subcommand name (`status`, `stage`,
    /// `attach`, `finalize`, `reword`, `unapply`)
    pub retries: BTreeMap<String, u32>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
            retries: BTreeMap::new(),
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Config {
    /// Directory holding the durable state documents for `workspace_root`.
    pub fn state_dir(&self, workspace_root: &Path) -> PathBuf {
        match self.core.state_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() {
                    dir
                } else {
                    workspace_root.join(dir)
                }
            }
            _ => workspace_root.join(".vbranch-sync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.core.cli_binary, "but");
        assert!(config.core.branch_seed_override.is_none());
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
        assert_eq!(config.notifications.ttl(), Duration::from_secs(300));
        assert_eq!(config.locks.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.inference.min_prefix_score, 1);
        assert_eq!(config.reconcile.cleanup_max_attempts, 3);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let toml_str = r#"
[locks]
stale_after_secs = 5

[commands.retries]
finalize = 9
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.locks.stale_after_secs, 5);
        assert_eq!(config.locks.poll_interval_ms, 100);
        assert_eq!(config.commands.retries.get("finalize"), Some(&9));
        assert_eq!(config.commands.timeout_secs, 30);
    }

    #[test]
    fn config_serialization_round_trip() {
        let mut config = Config::default();
        config.core.branch_seed_override = Some("shared".to_string());
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.core.branch_seed_override.as_deref(), Some("shared"));
        assert_eq!(back.reconcile.default_branch_pattern, config.reconcile.default_branch_pattern);
    }

    #[test]
    fn state_dir_resolution() {
        let mut config = Config::default();
        let root = Path::new("/repo");
        assert_eq!(config.state_dir(root), PathBuf::from("/repo/.vbranch-sync"));

        config.core.state_dir = Some("tmp/state".to_string());
        assert_eq!(config.state_dir(root), PathBuf::from("/repo/tmp/state"));

        config.core.state_dir = Some("/var/state".to_string());
        assert_eq!(config.state_dir(root), PathBuf::from("/var/state"));
    }
}
