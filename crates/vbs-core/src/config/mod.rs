//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Programmatic overrides (passed as parameters)
//! 2. Environment variables
//! 3. Explicit config file override
//! 4. Repo-local config (.vbranch-sync.toml)
//! 5. Global config (~/.config/vbranch-sync/config.toml)
//! 6. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, resolve_config};
pub use types::{
    CacheConfig, CommandConfig, Config, CoreConfig, InferenceConfig, LockConfig,
    NotificationConfig, ReconcileConfig,
};
