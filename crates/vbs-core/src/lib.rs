//! Core infrastructure for vbranch-sync
//!
//! This crate carries the pieces every part of the adapter leans on but that
//! carry no branch semantics of their own:
//! - Layered configuration (`.vbranch-sync.toml`, global config, environment)
//! - Canonical home directory resolution
//! - Process-level logging initialization
//! - Durable JSON documents with atomic replace
//! - Hashing and Unicode-safe text helpers

pub mod config;
pub mod home;
pub mod io;
pub mod logging;
pub mod text;

pub use config::{Config, ConfigError, ConfigOverrides, resolve_config};
pub use io::{JsonStore, StoreError};

// Re-export toml so callers can build config tables without a direct dependency
pub use toml;
