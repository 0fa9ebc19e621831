//! Durable state I/O
//!
//! The engine keeps two JSON documents per workspace (the session tree and
//! the plugin state). Both are mutated in memory and flushed after every
//! logical change:
//!
//! - **Atomic replace**: each write lands in a temp sibling and is renamed
//!   over the target, so a crash never leaves a half-written document
//! - **Generation ordering**: flushes are numbered; a slow, older flush never
//!   overwrites a newer one that already landed
//! - **Forgiving loads**: a missing or corrupt document loads as the default
//!   value and the corruption is logged
//!
//! # Example
//!
//! ```rust,no_run
//! use vbranch_sync_core::io::JsonStore;
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), vbranch_sync_core::io::StoreError> {
//! let store: JsonStore<BTreeMap<String, String>> = JsonStore::new("/tmp/doc.json");
//! let mut doc = store.load();
//! doc.insert("child".to_string(), "parent".to_string());
//! store.save(&doc).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hash;
pub mod store;

pub use error::StoreError;
pub use hash::digest;
pub use store::{JsonStore, StagedWrite};
