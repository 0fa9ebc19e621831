//! Session-scoped branch assignment and reconciliation engine
//!
//! Keeps a coding assistant's file edits in sync with an external
//! virtual-branch tool. Host lifecycle events come in through
//! [`SyncEngine::handle_event`]; everything the engine learns about the
//! workspace comes from the branch CLI's `status --json`, and everything it
//! changes goes back out as branch CLI commands.
//!
//! One [`SyncEngine`] owns all mutable state for one workspace root.

pub mod assignment;
pub mod cli;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod host;
pub mod lock;
pub mod notify;
pub mod reconcile;
pub mod session;
pub mod state;

pub use conversation::ConversationId;
pub use engine::{EditOutcome, SyncEngine};
pub use error::EngineError;
pub use host::{HostEvent, HostPlatform};
pub use reconcile::{CleanupOutcome, ReconcileOutcome, ReconcileReport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
