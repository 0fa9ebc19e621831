//! Error types for durable document I/O

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting a JSON document
#[derive(Error, Debug)]
pub enum StoreError {
    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize or parse JSON
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}
