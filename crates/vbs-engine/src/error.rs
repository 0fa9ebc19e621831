//! Engine construction errors

use std::path::PathBuf;
use thiserror::Error;
use vbranch_sync_core::ConfigError;

/// Failures that prevent a [`crate::SyncEngine`] from being built.
///
/// Once running, the engine never surfaces errors to its host; every
/// runtime failure is logged and absorbed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid default branch pattern '{pattern}': {source}")]
    BranchPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Could not resolve home directory: {message}")]
    Home { message: String },

    #[error("Workspace root {path} is not a directory")]
    Workspace { path: PathBuf },
}
