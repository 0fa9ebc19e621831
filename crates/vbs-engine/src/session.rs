//! Session tree and root resolution
//!
//! Sub-agents are tracked as `child -> parent` links. A sub-agent is visible
//! under two ids over its lifetime (the spawning tool call id, then the
//! execution/session id once the host reports it), so both ids are linked to
//! the same parent and resolve to the same root.
//!
//! The map is persisted to `sessions.json` after every mutation.

use crate::locked;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use vbranch_sync_core::io::{JsonStore, StagedWrite, StoreError};

/// Current schema version of the persisted session tree.
pub const SESSION_TREE_VERSION: u32 = 1;

fn default_version() -> u32 {
    SESSION_TREE_VERSION
}

/// Persisted form of the session tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTreeDoc {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub parents: BTreeMap<String, String>,
}

/// Resolves any session id to the root of its spawn chain.
#[derive(Debug)]
pub struct SessionResolver {
    parents: Mutex<BTreeMap<String, String>>,
    store: Arc<JsonStore<SessionTreeDoc>>,
}

impl SessionResolver {
    /// Load the tree from `path`, starting empty when missing or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Arc::new(JsonStore::new(path));
        let doc: SessionTreeDoc = store.load();
        if doc.version > SESSION_TREE_VERSION {
            warn!(
                "session tree {} has newer schema version {}, reading best-effort",
                store.path().display(),
                doc.version
            );
        }
        Self {
            parents: Mutex::new(doc.parents),
            store,
        }
    }

    /// Walk parent links to the top of the chain.
    ///
    /// Returns the first node without a parent. If the walk revisits a node
    /// the links form a cycle; the cycle is its own root and every member
    /// resolves to its smallest id.
    pub fn resolve_root(&self, session_id: &str) -> String {
        let parents = locked(&self.parents);
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(session_id);
        let mut current = session_id;

        while let Some(parent) = parents.get(current) {
            if !visited.insert(parent.as_str()) {
                let root = cycle_root(&parents, parent);
                warn!(
                    session_id,
                    "session tree contains a cycle through '{}', treating '{}' as root",
                    parent,
                    root
                );
                return root;
            }
            current = parent.as_str();
        }
        current.to_string()
    }

    pub fn parent_of(&self, session_id: &str) -> Option<String> {
        locked(&self.parents).get(session_id).cloned()
    }

    pub fn is_root(&self, session_id: &str) -> bool {
        !locked(&self.parents).contains_key(session_id)
    }

    /// Record a sub-agent spawn.
    ///
    /// `call_id` is linked immediately; `execution_id` is linked as well once
    /// the host reports it.
    pub fn track_spawn(&self, parent_id: &str, call_id: &str, execution_id: Option<&str>) {
        let mut changed = self.link(call_id, parent_id);
        if let Some(execution_id) = execution_id {
            changed |= self.link(execution_id, parent_id);
        }
        if changed {
            self.persist();
        }
    }

    /// Record a host "session created" notification carrying a parent id.
    pub fn track_session_created(&self, session_id: &str, parent_id: Option<&str>) {
        let Some(parent_id) = parent_id else {
            debug!(session_id, "session created without parent, nothing to link");
            return;
        };
        if self.link(session_id, parent_id) {
            self.persist();
        }
    }

    /// Await a flush of the current tree.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let staged = self.stage()?;
        self.store.write(staged).await.map(|_| ())
    }

    /// Returns whether the map changed.
    fn link(&self, child: &str, parent: &str) -> bool {
        let child = child.trim();
        let parent = parent.trim();
        if child.is_empty() || parent.is_empty() || child == parent {
            return false;
        }

        let mut parents = locked(&self.parents);
        match parents.get(child) {
            Some(existing) if existing == parent => false,
            Some(existing) => {
                warn!(
                    session_id = child,
                    "session already linked to '{}', ignoring new parent '{}'", existing, parent
                );
                false
            }
            None => {
                debug!(session_id = child, parent_id = parent, "linked sub-agent session");
                parents.insert(child.to_string(), parent.to_string());
                true
            }
        }
    }

    fn stage(&self) -> Result<StagedWrite, StoreError> {
        let parents = locked(&self.parents);
        self.store.stage(&SessionTreeDoc {
            version: SESSION_TREE_VERSION,
            parents: parents.clone(),
        })
    }

    fn persist(&self) {
        match self.stage() {
            Ok(staged) => self.store.spawn_write(staged),
            Err(e) => warn!(error = %e, "failed to encode session tree"),
        }
    }
}

fn cycle_root(parents: &BTreeMap<String, String>, start: &str) -> String {
    let mut smallest = start;
    let mut current = start;
    while let Some(next) = parents.get(current) {
        if next == start {
            break;
        }
        if next.as_str() < smallest {
            smallest = next.as_str();
        }
        current = next.as_str();
    }
    smallest.to_string()
}
