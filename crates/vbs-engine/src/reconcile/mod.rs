//! Idle-triggered reconciliation
//!
//! When a root session goes idle after editing, one pass runs per
//! conversation:
//!
//! 1. reap stale file locks
//! 2. sweep the turn's edited files onto their inferred branches
//! 3. finalize the conversation's pending edits
//! 4. reword and rename the conversation's local branches
//! 5. set the session title
//! 6. unapply empty auto-named branches
//!
//! Passes are single-flight per conversation. A second idle signal while a
//! pass runs is dropped, not queued. Every step is best-effort; failures are
//! logged and the pass moves on.

pub mod cleanup;
pub mod message;

pub use cleanup::{CleanupOutcome, cleanup_branch};
pub use message::{MessageGenerator, MessageSource, is_conventional};

use crate::assignment::Assignment;
use crate::cli::{Branch, BranchCommand, CommandOutcome, StatusSnapshot};
use crate::conversation::ConversationId;
use crate::engine::SyncEngine;
use crate::host::latest_user_text;
use crate::locked;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use vbranch_sync_core::text::first_meaningful_line;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The conversation has no edits since its last pass.
    NotEligible,
    /// A pass for this conversation is already running.
    AlreadyRunning,
    Completed(ReconcileReport),
}

/// Why a pass ended before its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoUserMessage,
    NoStatus,
}

/// An unassigned file moved during the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptFile {
    pub path: String,
    /// Target branch, `None` when attached to the conversation instead.
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewordSource {
    /// The existing message was already conventional.
    Kept,
    Generated(MessageSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewordedBranch {
    pub branch: String,
    pub message: String,
    pub source: RewordSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRename {
    pub from: String,
    pub to: String,
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub conversation_id: ConversationId,
    pub reaped_locks: usize,
    pub swept: Vec<SweptFile>,
    pub finalized: bool,
    pub reworded: Vec<RewordedBranch>,
    pub renames: Vec<BranchRename>,
    pub title: Option<String>,
    pub cleanups: Vec<(String, CleanupOutcome)>,
    pub stopped: Option<StopReason>,
}

impl ReconcileReport {
    fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            reaped_locks: 0,
            swept: Vec::new(),
            finalized: false,
            reworded: Vec::new(),
            renames: Vec::new(),
            title: None,
            cleanups: Vec::new(),
            stopped: None,
        }
    }
}

/// Membership in the in-flight set, removed on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<ConversationId>>,
    conversation: ConversationId,
}

impl<'a> InFlight<'a> {
    fn enter(
        set: &'a Mutex<HashSet<ConversationId>>,
        conversation: &ConversationId,
    ) -> Option<Self> {
        locked(set).insert(conversation.clone()).then(|| Self {
            set,
            conversation: conversation.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        locked(self.set).remove(&self.conversation);
    }
}

impl SyncEngine {
    /// Run one reconciliation pass for the conversation of `session_id`.
    pub async fn on_idle(&self, session_id: &str) -> ReconcileOutcome {
        let root = self.sessions.resolve_root(session_id);
        let conversation = self.conversation_for_root(&root);

        if !self.state.has_edits(&conversation) {
            debug!(conversation_id = %conversation, "idle without edits, nothing to reconcile");
            return ReconcileOutcome::NotEligible;
        }
        let Some(_in_flight) = InFlight::enter(&self.in_flight, &conversation) else {
            debug!(
                conversation_id = %conversation,
                "reconciliation already running, dropping idle signal"
            );
            return ReconcileOutcome::AlreadyRunning;
        };

        let edited = locked(&self.turn_edits)
            .remove(&conversation)
            .unwrap_or_default();
        info!(
            conversation_id = %conversation,
            root_session_id = %root,
            files = edited.len(),
            "reconciling conversation"
        );

        let mut report = ReconcileReport::new(conversation.clone());
        self.reconcile(&root, &conversation, &edited, &mut report)
            .await;

        // Edits recorded while the pass ran belong to the next pass.
        if !locked(&self.turn_edits).contains_key(&conversation) {
            self.state.clear_edits(&conversation);
        }
        info!(
            conversation_id = %conversation,
            swept = report.swept.len(),
            reworded = report.reworded.len(),
            renamed = report.renames.len(),
            cleaned = report.cleanups.len(),
            "reconciliation finished"
        );
        ReconcileOutcome::Completed(report)
    }

    async fn reconcile(
        &self,
        root: &str,
        conversation: &ConversationId,
        edited: &BTreeSet<String>,
        report: &mut ReconcileReport,
    ) {
        report.reaped_locks = self.locks.reap();
        report.swept = self.sweep(conversation, edited).await;
        report.finalized = self.finalize(conversation).await;

        let user_text = match self.host.session_messages(root).await {
            Ok(messages) => latest_user_text(&messages).map(String::from),
            Err(e) => {
                warn!(root_session_id = root, "could not read session messages: {}", e);
                None
            }
        };
        let Some(user_text) = user_text else {
            info!(root_session_id = root, "no user message, stopping after finalize");
            report.stopped = Some(StopReason::NoUserMessage);
            return;
        };

        let snapshot = match self.executor.status().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                report.stopped = Some(StopReason::NoStatus);
                return;
            }
            Err(e) => {
                warn!(conversation_id = %conversation, "status before rewording failed: {}", e);
                report.stopped = Some(StopReason::NoStatus);
                return;
            }
        };

        let handled = self
            .reword_branches(root, conversation, edited, &snapshot, &user_text, report)
            .await;

        let title = handled
            .into_iter()
            .next()
            .or_else(|| self.state.owned_branch(conversation));
        if let Some(title) = &title {
            match self.host.set_session_title(root, title).await {
                Ok(()) => debug!(root_session_id = root, title = %title, "session title set"),
                Err(e) => warn!(root_session_id = root, "could not set session title: {}", e),
            }
        }
        report.title = title;

        report.cleanups = self.cleanup_empty_branches(&snapshot).await;
    }

    /// Move each unassigned edited file onto its inferred branch, or attach
    /// it to the conversation when no branch claims it.
    async fn sweep(
        &self,
        conversation: &ConversationId,
        edited: &BTreeSet<String>,
    ) -> Vec<SweptFile> {
        if edited.is_empty() {
            return Vec::new();
        }
        let snapshot = match self.executor.status().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(conversation_id = %conversation, "sweep status failed: {}", e);
                return Vec::new();
            }
        };

        let mut swept = Vec::new();
        for path in edited {
            let Some(change) = snapshot.unassigned(path).cloned() else {
                continue;
            };
            let lookup = self.assigner.evaluate(conversation, path, snapshot.clone());
            if lookup.multi_branch {
                continue;
            }
            let (command, branch) = match lookup.assignment {
                Assignment::Branch {
                    branch_id,
                    branch_name,
                    ..
                } => (
                    BranchCommand::Stage {
                        source: change.cli_id,
                        destination: branch_id,
                    },
                    Some(branch_name),
                ),
                Assignment::NotInBranch => (
                    BranchCommand::AttachEdit {
                        conversation_id: conversation.to_string(),
                        file_path: path.clone(),
                        tool_name: "edit".to_string(),
                        tool_input: json!({}),
                    },
                    None,
                ),
                Assignment::Ambiguous { .. } => continue,
            };
            match self.executor.run(&command).await {
                Ok(CommandOutcome::Skipped { detail }) => {
                    debug!(path = %path, "sweep skipped: {}", detail);
                }
                Ok(_) => swept.push(SweptFile {
                    path: path.clone(),
                    branch,
                }),
                Err(e) => warn!(path = %path, "sweep failed for file: {}", e),
            }
        }
        swept
    }

    async fn finalize(&self, conversation: &ConversationId) -> bool {
        let command = BranchCommand::Finalize {
            conversation_id: conversation.to_string(),
        };
        match self.executor.run(&command).await {
            Ok(CommandOutcome::Completed { .. } | CommandOutcome::NothingToDo { .. }) => true,
            Ok(CommandOutcome::Skipped { detail }) => {
                warn!(conversation_id = %conversation, "finalize skipped: {}", detail);
                false
            }
            Err(e) => {
                warn!(conversation_id = %conversation, "finalize failed, continuing: {}", e);
                false
            }
        }
    }

    /// Branches attributed to the conversation: those committing a file it
    /// edited this turn, plus its owned branch.
    fn attributed_branches(
        &self,
        conversation: &ConversationId,
        edited: &BTreeSet<String>,
        snapshot: &StatusSnapshot,
    ) -> Vec<Branch> {
        let owned = self.state.owned_branch(conversation);
        let mut seen = HashSet::new();
        snapshot
            .branches()
            .filter(|b| {
                edited.iter().any(|path| b.touches(path))
                    || owned.as_deref() == Some(b.name.as_str())
            })
            .filter(|b| seen.insert(b.cli_id.clone()))
            .cloned()
            .collect()
    }

    /// Returns the final names of the branches handled, in order.
    async fn reword_branches(
        &self,
        root: &str,
        conversation: &ConversationId,
        edited: &BTreeSet<String>,
        snapshot: &StatusSnapshot,
        user_text: &str,
        report: &mut ReconcileReport,
    ) -> Vec<String> {
        let branches = self.attributed_branches(conversation, edited, snapshot);
        if self.state.owned_branch(conversation).is_none() {
            if let Some(first) = branches.first() {
                self.state.set_branch_name(conversation, root, &first.name);
            }
        }

        let mut handled = Vec::new();
        for branch in &branches {
            if !branch.is_fully_local() || self.state.is_reworded(&branch.name) {
                continue;
            }
            let Some(head) = branch.head_commit() else {
                continue;
            };

            if is_conventional(&head.message) {
                debug!(branch = %branch.name, "head message already conventional, keeping it");
                report.reworded.push(RewordedBranch {
                    branch: branch.name.clone(),
                    message: first_meaningful_line(&head.message)
                        .unwrap_or_default()
                        .to_string(),
                    source: RewordSource::Kept,
                });
            } else {
                let files: Vec<String> = branch.committed_files().map(String::from).collect();
                let (message, source) = self
                    .messages
                    .generate(self.host.as_ref(), user_text, &files)
                    .await;
                let command = BranchCommand::Reword {
                    target: head.cli_id.clone(),
                    message: message.clone(),
                };
                match self.executor.run(&command).await {
                    Ok(CommandOutcome::Skipped { detail }) => {
                        debug!(branch = %branch.name, "reword skipped: {}", detail);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(branch = %branch.name, "reword failed: {}", e);
                        continue;
                    }
                }
                info!(branch = %branch.name, ?source, "reworded head commit: {}", message);
                report.reworded.push(RewordedBranch {
                    branch: branch.name.clone(),
                    message,
                    source: RewordSource::Generated(source),
                });
            }

            // Only the surviving name is recorded, so a later branch that
            // reuses the auto-generated name is still reworded.
            let name = self
                .rename_if_default(root, conversation, branch, user_text, report)
                .await;
            self.state.mark_reworded(&name);
            handled.push(name);
        }
        handled
    }

    /// Rename an auto-named branch to a slug of the request. Returns the
    /// branch's name afterwards.
    async fn rename_if_default(
        &self,
        root: &str,
        conversation: &ConversationId,
        branch: &Branch,
        user_text: &str,
        report: &mut ReconcileReport,
    ) -> String {
        if !self.default_branch.is_match(&branch.name) {
            return branch.name.clone();
        }
        let Some(slug) = self.messages.slug(user_text) else {
            return branch.name.clone();
        };
        let command = BranchCommand::Reword {
            target: branch.cli_id.clone(),
            message: slug.clone(),
        };
        match self.executor.run(&command).await {
            Ok(CommandOutcome::Skipped { detail }) => {
                debug!(branch = %branch.name, "rename skipped: {}", detail);
                return branch.name.clone();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(branch = %branch.name, "rename failed: {}", e);
                return branch.name.clone();
            }
        }

        info!(from = %branch.name, to = %slug, "renamed branch");
        if self.state.owned_branch(conversation).as_deref() == Some(branch.name.as_str()) {
            self.state.set_branch_name(conversation, root, &slug);
        }
        self.assigner.cache().invalidate_conversation(conversation);
        report.renames.push(BranchRename {
            from: branch.name.clone(),
            to: slug.clone(),
        });
        slug
    }

    async fn cleanup_empty_branches(
        &self,
        snapshot: &StatusSnapshot,
    ) -> Vec<(String, CleanupOutcome)> {
        let candidates: Vec<(String, String)> = snapshot
            .stacks
            .iter()
            .filter(|s| s.assigned_changes.is_empty())
            .flat_map(|s| s.branches.iter())
            .filter(|b| b.commits.is_empty() && self.default_branch.is_match(&b.name))
            .map(|b| (b.cli_id.clone(), b.name.clone()))
            .collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        for (branch_id, name) in candidates {
            let outcome = cleanup_branch(
                &self.executor,
                &branch_id,
                &name,
                self.config.reconcile.cleanup_max_attempts,
            )
            .await;
            outcomes.push((name, outcome));
        }
        outcomes
    }
}
