//! Removal of empty auto-named branches
//!
//! Every retry re-reads status first. A branch that disappeared in the
//! meantime counts as removed; one that gained commits or staged changes is
//! left alone.

use crate::cli::{
    BranchCommand, CommandExecutor, CommandOutcome, FailureReason, StatusSnapshot, failure_reason,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The unapply command succeeded.
    Removed,
    /// The branch was already gone.
    Gone,
    /// The branch is no longer empty.
    Skipped { reason: String },
    Failed { detail: String },
}

impl CleanupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CleanupOutcome::Removed | CleanupOutcome::Gone)
    }
}

/// Branch still empty and unstaged in `snapshot`, or why not.
fn recheck(snapshot: &StatusSnapshot, branch_id: &str) -> Result<(), CleanupOutcome> {
    let Some(branch) = snapshot.branch_by_id(branch_id) else {
        return Err(CleanupOutcome::Gone);
    };
    if !branch.commits.is_empty() {
        return Err(CleanupOutcome::Skipped {
            reason: format!("{} gained commits", branch.name),
        });
    }
    let staged = snapshot
        .stacks
        .iter()
        .find(|s| s.branches.iter().any(|b| b.cli_id == branch_id))
        .is_some_and(|s| !s.assigned_changes.is_empty());
    if staged {
        return Err(CleanupOutcome::Skipped {
            reason: format!("{} has staged changes", branch.name),
        });
    }
    Ok(())
}

pub async fn cleanup_branch(
    executor: &CommandExecutor,
    branch_id: &str,
    branch_name: &str,
    max_attempts: u32,
) -> CleanupOutcome {
    let max_attempts = max_attempts.max(1);
    let mut last_detail = String::from("no attempt made");

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(executor.policy().backoff(attempt - 1)).await;
            match executor.status().await {
                Ok(Some(snapshot)) => {
                    if let Err(outcome) = recheck(&snapshot, branch_id) {
                        info!(
                            branch = branch_name,
                            attempt, "cleanup re-check resolved branch: {:?}", outcome
                        );
                        return outcome;
                    }
                }
                Ok(None) => {
                    debug!(branch = branch_name, "no status available for cleanup re-check")
                }
                Err(e) => debug!(branch = branch_name, "cleanup re-check failed: {}", e),
            }
        }

        let command = BranchCommand::Unapply {
            branch_id: branch_id.to_string(),
        };
        match executor.run(&command).await {
            Ok(CommandOutcome::Completed { .. }) => {
                info!(branch = branch_name, attempt, "removed empty branch");
                return CleanupOutcome::Removed;
            }
            Ok(CommandOutcome::NothingToDo { .. }) => return CleanupOutcome::Gone,
            Ok(CommandOutcome::Skipped { detail }) => {
                debug!(branch = branch_name, attempt, "cleanup raced, re-checking: {}", detail);
                last_detail = detail;
            }
            Err(e) => {
                let detail = e.detail();
                match failure_reason(&detail) {
                    FailureReason::Contention => {
                        debug!(branch = branch_name, attempt, "cleanup contended: {}", detail);
                        last_detail = detail;
                    }
                    FailureReason::NotFound => {
                        debug!(branch = branch_name, "branch already gone: {}", detail);
                        return CleanupOutcome::Gone;
                    }
                    FailureReason::Unknown => {
                        warn!(branch = branch_name, attempt, "cleanup failed: {}", e);
                        return CleanupOutcome::Failed { detail };
                    }
                }
            }
        }
    }

    warn!(
        branch = branch_name,
        "cleanup gave up after {} attempt(s): {}", max_attempts, last_detail
    );
    CleanupOutcome::Failed {
        detail: last_detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{
        Branch, Commit, FileChange, MockBranchCli, RawOutput, RetryPolicy, Stack, Subcommand,
    };
    use std::sync::Arc;

    fn executor(mock: &MockBranchCli) -> CommandExecutor {
        let policy = RetryPolicy::default().with_retries(Subcommand::Unapply, 0);
        CommandExecutor::new(Arc::new(mock.clone()), policy)
    }

    fn with_branch(branch: Branch) -> StatusSnapshot {
        StatusSnapshot {
            stacks: vec![Stack::new("s1", vec![branch])],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn clean_removal() {
        let mock = MockBranchCli::new();
        let outcome = cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await;
        assert_eq!(outcome, CleanupOutcome::Removed);
        assert!(mock.calls_for(Subcommand::Status).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn branch_disappearing_between_attempts_is_success() {
        let mock = MockBranchCli::new();
        mock.fail_times(Subcommand::Unapply, 1, "database is locked");
        mock.set_status(StatusSnapshot::default());
        let outcome = cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await;
        assert_eq!(outcome, CleanupOutcome::Gone);
        assert!(outcome.is_success());
        assert_eq!(mock.calls_for(Subcommand::Unapply).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn branch_gaining_commit_is_skip() {
        let mock = MockBranchCli::new();
        mock.fail_times(Subcommand::Unapply, 1, "database is locked");
        mock.set_status(with_branch(
            Branch::new("b1", "branch-1").with_commit(Commit::local("c1", "wip", &["a.rs"])),
        ));
        let outcome = cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await;
        assert!(matches!(outcome, CleanupOutcome::Skipped { .. }));
        assert!(!outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn branch_gaining_staged_change_is_skip() {
        let mock = MockBranchCli::new();
        mock.fail_times(Subcommand::Unapply, 1, "resource temporarily unavailable");
        mock.set_status(StatusSnapshot {
            stacks: vec![
                Stack::new("s1", vec![Branch::new("b1", "branch-1")])
                    .with_staged(FileChange::new("h1", "a.rs")),
            ],
            ..Default::default()
        });
        let outcome = cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await;
        assert!(matches!(outcome, CleanupOutcome::Skipped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_contention_fails_after_budget() {
        let mock = MockBranchCli::new();
        mock.fail_times(Subcommand::Unapply, 10, "database is locked");
        mock.set_status(with_branch(Branch::new("b1", "branch-1")));
        let outcome = cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await;
        assert!(matches!(outcome, CleanupOutcome::Failed { .. }));
        assert_eq!(mock.calls_for(Subcommand::Unapply).len(), 3);
    }

    #[tokio::test]
    async fn not_found_is_gone_and_unknown_is_failed() {
        let mock = MockBranchCli::new();
        mock.script(Subcommand::Unapply, RawOutput::failure(1, "error: branch does not exist"));
        assert_eq!(
            cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await,
            CleanupOutcome::Gone
        );

        mock.script(Subcommand::Unapply, RawOutput::failure(1, "segmentation fault"));
        assert!(matches!(
            cleanup_branch(&executor(&mock), "b1", "branch-1", 3).await,
            CleanupOutcome::Failed { .. }
        ));
    }
}
