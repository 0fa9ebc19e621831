//! Assignment lookup: cache first, then inference over a fresh status

pub mod cache;
pub mod inference;

pub use cache::{AssignmentCache, CacheEntry};
pub use inference::{Assignment, BranchInference, Confidence, has_multi_branch_hunks};

use crate::cli::{CommandError, CommandExecutor, StatusSnapshot};
use crate::conversation::ConversationId;
use tracing::{debug, info};

/// What a lookup found for one file.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub assignment: Assignment,
    /// Changes split across branches; automatic attribution is vetoed.
    pub multi_branch: bool,
    pub from_cache: bool,
    /// The snapshot the decision was made on, absent on a cache hit.
    pub snapshot: Option<StatusSnapshot>,
}

#[derive(Debug)]
pub struct BranchAssigner {
    cache: AssignmentCache,
    inference: BranchInference,
}

impl BranchAssigner {
    pub fn new(cache: AssignmentCache, inference: BranchInference) -> Self {
        Self { cache, inference }
    }

    pub fn cache(&self) -> &AssignmentCache {
        &self.cache
    }

    pub fn inference(&self) -> &BranchInference {
        &self.inference
    }

    /// Resolve `path` for `conversation`.
    ///
    /// A fresh cache entry short-circuits the status query. `Ok(None)` means
    /// the tool had no status to offer (for example the workspace is not
    /// initialized).
    pub async fn lookup(
        &self,
        executor: &CommandExecutor,
        conversation: &ConversationId,
        path: &str,
    ) -> Result<Option<Lookup>, CommandError> {
        if let Some(entry) = self.cache.get(conversation, path) {
            debug!(conversation_id = %conversation, path, "assignment cache hit");
            return Ok(Some(Lookup {
                assignment: Assignment::Branch {
                    branch_id: entry.branch_id,
                    branch_name: entry.branch_name,
                    confidence: entry.confidence,
                },
                multi_branch: false,
                from_cache: true,
                snapshot: None,
            }));
        }

        let Some(snapshot) = executor.status().await? else {
            return Ok(None);
        };
        Ok(Some(self.evaluate(conversation, path, snapshot)))
    }

    /// Run inference on an already fetched snapshot and cache confident,
    /// unsplit results.
    pub fn evaluate(
        &self,
        conversation: &ConversationId,
        path: &str,
        snapshot: StatusSnapshot,
    ) -> Lookup {
        let multi_branch = has_multi_branch_hunks(&snapshot, path);
        let assignment = self.inference.infer(&snapshot, path);

        match &assignment {
            Assignment::Branch {
                branch_id,
                branch_name,
                confidence,
            } if !multi_branch => {
                self.cache
                    .insert(conversation, path, branch_id, branch_name, *confidence);
            }
            Assignment::Ambiguous { candidates } => {
                info!(
                    conversation_id = %conversation,
                    path,
                    "branch assignment ambiguous between {:?}, leaving it alone",
                    candidates
                );
            }
            _ => {}
        }

        Lookup {
            assignment,
            multi_branch,
            from_cache: false,
            snapshot: Some(snapshot),
        }
    }
}
