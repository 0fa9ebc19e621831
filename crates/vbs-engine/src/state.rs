//! Persisted plugin state
//!
//! Branch ownership per conversation plus the two idempotency guards
//! (reworded branches, conversations with edits). Mutated in memory and
//! flushed to `state.json` after every logical change; a failed flush is
//! logged and the in-memory copy stays authoritative.

use crate::conversation::ConversationId;
use crate::locked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use vbranch_sync_core::io::{JsonStore, StagedWrite, StoreError};

pub const PLUGIN_STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    PLUGIN_STATE_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchOwnership {
    pub root_session_id: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStateDoc {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub branch_ownership: BTreeMap<String, BranchOwnership>,
    #[serde(default)]
    pub reworded_branches: BTreeSet<String>,
    #[serde(default)]
    pub conversations_with_edits: BTreeSet<String>,
}

/// Result of claiming a conversation for a root session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First claim; ownership recorded.
    Claimed,
    /// Same root claimed it before.
    AlreadyOwned,
    /// A different root owns this conversation id. Nothing was changed.
    Collision { existing_root: String },
}

#[derive(Debug)]
pub struct PluginState {
    doc: Mutex<PluginStateDoc>,
    store: Arc<JsonStore<PluginStateDoc>>,
}

impl PluginState {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Arc::new(JsonStore::new(path));
        let mut doc: PluginStateDoc = store.load();
        if doc.version > PLUGIN_STATE_VERSION {
            warn!(
                "plugin state {} has newer schema version {}, reading best-effort",
                store.path().display(),
                doc.version
            );
        }
        doc.version = PLUGIN_STATE_VERSION;
        Self {
            doc: Mutex::new(doc),
            store,
        }
    }

    /// Record `root_session_id` as the owner of `conversation`.
    ///
    /// An existing owner is never replaced. A claim by a different root is a
    /// collision: it is logged and reported, never fatal.
    pub fn claim(&self, conversation: &ConversationId, root_session_id: &str) -> ClaimOutcome {
        let outcome = {
            let mut doc = locked(&self.doc);
            match doc.branch_ownership.get(conversation.as_str()) {
                Some(existing) if existing.root_session_id == root_session_id => {
                    return ClaimOutcome::AlreadyOwned;
                }
                Some(existing) => ClaimOutcome::Collision {
                    existing_root: existing.root_session_id.clone(),
                },
                None => {
                    doc.branch_ownership.insert(
                        conversation.to_string(),
                        BranchOwnership {
                            root_session_id: root_session_id.to_string(),
                            branch_name: None,
                            first_seen_at: Utc::now(),
                        },
                    );
                    ClaimOutcome::Claimed
                }
            }
        };

        match &outcome {
            ClaimOutcome::Claimed => {
                debug!(conversation_id = %conversation, root_session_id, "claimed conversation");
                self.persist();
            }
            ClaimOutcome::Collision { existing_root } => warn!(
                conversation_id = %conversation,
                root_session_id,
                "conversation id already owned by root '{}', keeping existing owner",
                existing_root
            ),
            ClaimOutcome::AlreadyOwned => {}
        }
        outcome
    }

    pub fn ownership(&self, conversation: &ConversationId) -> Option<BranchOwnership> {
        locked(&self.doc)
            .branch_ownership
            .get(conversation.as_str())
            .cloned()
    }

    pub fn owned_branch(&self, conversation: &ConversationId) -> Option<String> {
        self.ownership(conversation).and_then(|o| o.branch_name)
    }

    /// Update the owned branch name. Only the recorded owner may do so.
    pub fn set_branch_name(
        &self,
        conversation: &ConversationId,
        root_session_id: &str,
        branch_name: &str,
    ) -> bool {
        {
            let mut doc = locked(&self.doc);
            let Some(entry) = doc.branch_ownership.get_mut(conversation.as_str()) else {
                return false;
            };
            if entry.root_session_id != root_session_id {
                warn!(
                    conversation_id = %conversation,
                    root_session_id,
                    "refusing branch name update from non-owner"
                );
                return false;
            }
            if entry.branch_name.as_deref() == Some(branch_name) {
                return true;
            }
            entry.branch_name = Some(branch_name.to_string());
        }
        self.persist();
        true
    }

    pub fn mark_edited(&self, conversation: &ConversationId) {
        let inserted = locked(&self.doc)
            .conversations_with_edits
            .insert(conversation.to_string());
        if inserted {
            self.persist();
        }
    }

    pub fn has_edits(&self, conversation: &ConversationId) -> bool {
        locked(&self.doc)
            .conversations_with_edits
            .contains(conversation.as_str())
    }

    /// Returns whether the conversation was marked.
    pub fn clear_edits(&self, conversation: &ConversationId) -> bool {
        let removed = locked(&self.doc)
            .conversations_with_edits
            .remove(conversation.as_str());
        if removed {
            self.persist();
        }
        removed
    }

    pub fn is_reworded(&self, branch_name: &str) -> bool {
        locked(&self.doc).reworded_branches.contains(branch_name)
    }

    pub fn mark_reworded(&self, branch_name: &str) {
        let changed = locked(&self.doc)
            .reworded_branches
            .insert(branch_name.to_string());
        if changed {
            self.persist();
        }
    }

    pub fn snapshot(&self) -> PluginStateDoc {
        locked(&self.doc).clone()
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        let staged = self.stage()?;
        self.store.write(staged).await.map(|_| ())
    }

    /// Staged while the document lock is held, so a later generation always
    /// carries every earlier mutation.
    fn stage(&self) -> Result<StagedWrite, StoreError> {
        let doc = locked(&self.doc);
        self.store.stage(&doc)
    }

    fn persist(&self) {
        match self.stage() {
            Ok(staged) => self.store.spawn_write(staged),
            Err(e) => warn!(error = %e, "failed to encode plugin state"),
        }
    }
}
