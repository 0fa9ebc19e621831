//! Branch inference over a status snapshot
//!
//! Decides which branch an edited file belongs to, in priority order:
//! committed in a branch (high), staged in a single-branch stack (high),
//! staged with several candidate branches and a clear directory-prefix
//! winner (medium), otherwise ambiguous. Ambiguous results are never acted
//! upon automatically.

use crate::cli::status::{Branch, StatusSnapshot, same_path};
use std::collections::BTreeSet;
use vbranch_sync_core::config::InferenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Branch {
        branch_id: String,
        branch_name: String,
        confidence: Confidence,
    },
    /// Several candidates and no clear winner; carries candidate names.
    Ambiguous { candidates: Vec<String> },
    /// The file is in no branch (new or unassigned).
    NotInBranch,
}

impl Assignment {
    fn branch(branch: &Branch, confidence: Confidence) -> Self {
        Assignment::Branch {
            branch_id: branch.cli_id.clone(),
            branch_name: branch.name.clone(),
            confidence,
        }
    }

    pub fn branch_name(&self) -> Option<&str> {
        match self {
            Assignment::Branch { branch_name, .. } => Some(branch_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BranchInference {
    min_prefix_score: usize,
    min_margin: usize,
}

impl Default for BranchInference {
    fn default() -> Self {
        Self::new(&InferenceConfig::default())
    }
}

impl BranchInference {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            min_prefix_score: config.min_prefix_score,
            min_margin: config.min_margin,
        }
    }

    pub fn infer(&self, snapshot: &StatusSnapshot, path: &str) -> Assignment {
        if let Some(branch) = snapshot.branch_committing(path) {
            return Assignment::branch(branch, Confidence::High);
        }

        let staging: Vec<_> = snapshot.stacks_staging(path).collect();
        if let [stack] = staging.as_slice() {
            if let [branch] = stack.branches.as_slice() {
                return Assignment::branch(branch, Confidence::High);
            }
        }

        let candidates: Vec<&Branch> = staging.iter().flat_map(|s| s.branches.iter()).collect();
        if candidates.is_empty() {
            return Assignment::NotInBranch;
        }

        let mut scored: Vec<(usize, &Branch)> = candidates
            .iter()
            .map(|b| (prefix_score(b, path), *b))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let best = scored[0];
        let runner_up = scored.get(1).map_or(0, |s| s.0);
        if best.0 >= self.min_prefix_score && best.0.saturating_sub(runner_up) >= self.min_margin
        {
            return Assignment::branch(best.1, Confidence::Medium);
        }

        Assignment::Ambiguous {
            candidates: scored.iter().map(|(_, b)| b.name.clone()).collect(),
        }
    }
}

/// True when the file's changes are split across more than one branch slot:
/// staged in several stacks, or staged in one stack while committed in a
/// branch of another. Split ownership is always left to the operator.
pub fn has_multi_branch_hunks(snapshot: &StatusSnapshot, path: &str) -> bool {
    let owners: BTreeSet<&str> = snapshot
        .stacks
        .iter()
        .filter(|s| s.stages(path) || s.branches.iter().any(|b| b.touches(path)))
        .map(|s| s.cli_id.as_str())
        .collect();
    owners.len() > 1 && snapshot.stacks_staging(path).next().is_some()
}

/// Best directory-prefix depth between `path` and any file the branch has
/// committed.
fn prefix_score(branch: &Branch, path: &str) -> usize {
    branch
        .committed_files()
        .map(|f| prefix_depth(f, path))
        .max()
        .unwrap_or(0)
}

/// Number of leading directory components two paths share.
pub fn prefix_depth(a: &str, b: &str) -> usize {
    if same_path(a, b) {
        return directories(a).count();
    }
    directories(a)
        .zip(directories(b))
        .take_while(|(x, y)| x == y)
        .count()
}

fn directories(path: &str) -> impl Iterator<Item = &str> {
    let path = path.trim_start_matches("./");
    let dir = path.rsplit_once('/').map_or("", |(dir, _)| dir);
    dir.split('/').filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::status::{Commit, FileChange, Stack};

    fn staged(stack: Stack, path: &str) -> Stack {
        stack.with_staged(FileChange::new("h", path))
    }

    #[test]
    fn prefix_depth_counts_directories_only() {
        assert_eq!(prefix_depth("src/auth/login.rs", "src/auth/token.rs"), 2);
        assert_eq!(prefix_depth("src/auth/login.rs", "src/db/pool.rs"), 1);
        assert_eq!(prefix_depth("README.md", "src/lib.rs"), 0);
        assert_eq!(prefix_depth("./src/a.rs", "src/b.rs"), 1);
    }

    #[test]
    fn committed_file_is_high() {
        let snapshot = StatusSnapshot {
            stacks: vec![Stack::new(
                "s1",
                vec![Branch::new("b1", "feature").with_commit(Commit::local(
                    "c1",
                    "feat: x",
                    &["src/a.rs"],
                ))],
            )],
            ..Default::default()
        };
        assert_eq!(
            BranchInference::default().infer(&snapshot, "src/a.rs"),
            Assignment::Branch {
                branch_id: "b1".into(),
                branch_name: "feature".into(),
                confidence: Confidence::High
            }
        );
    }

    #[test]
    fn staged_in_single_branch_stack_is_high() {
        let snapshot = StatusSnapshot {
            stacks: vec![staged(Stack::new("s1", vec![Branch::new("b1", "only")]), "x.rs")],
            ..Default::default()
        };
        let result = BranchInference::default().infer(&snapshot, "x.rs");
        assert!(matches!(
            result,
            Assignment::Branch {
                confidence: Confidence::High,
                ..
            }
        ));
    }

    #[test]
    fn prefix_winner_with_margin_is_medium() {
        let auth = Branch::new("b1", "auth").with_commit(Commit::local(
            "c1",
            "feat: login",
            &["src/auth/login.rs"],
        ));
        let db = Branch::new("b2", "db").with_commit(Commit::local(
            "c2",
            "feat: pool",
            &["src/db/pool.rs"],
        ));
        let snapshot = StatusSnapshot {
            stacks: vec![staged(Stack::new("s1", vec![auth, db]), "src/auth/token.rs")],
            ..Default::default()
        };
        assert_eq!(
            BranchInference::default().infer(&snapshot, "src/auth/token.rs"),
            Assignment::Branch {
                branch_id: "b1".into(),
                branch_name: "auth".into(),
                confidence: Confidence::Medium
            }
        );
    }

    #[test]
    fn tied_candidates_are_ambiguous() {
        let left =
            Branch::new("b1", "left").with_commit(Commit::local("c1", "x", &["src/a/one.rs"]));
        let right =
            Branch::new("b2", "right").with_commit(Commit::local("c2", "y", &["src/b/two.rs"]));
        let snapshot = StatusSnapshot {
            stacks: vec![staged(Stack::new("s1", vec![left, right]), "src/c/three.rs")],
            ..Default::default()
        };
        match BranchInference::default().infer(&snapshot, "src/c/three.rs") {
            Assignment::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn thresholds_are_configurable() {
        let auth = Branch::new("b1", "auth").with_commit(Commit::local(
            "c1",
            "x",
            &["src/auth/login.rs"],
        ));
        let db = Branch::new("b2", "db").with_commit(Commit::local("c2", "y", &["src/db/pool.rs"]));
        let snapshot = StatusSnapshot {
            stacks: vec![staged(Stack::new("s1", vec![auth, db]), "src/auth/token.rs")],
            ..Default::default()
        };
        let strict = BranchInference::new(&InferenceConfig {
            min_prefix_score: 1,
            min_margin: 2,
        });
        assert!(matches!(
            strict.infer(&snapshot, "src/auth/token.rs"),
            Assignment::Ambiguous { .. }
        ));
    }

    #[test]
    fn unknown_or_unassigned_is_not_in_branch() {
        let snapshot = StatusSnapshot {
            unassigned_changes: vec![FileChange::new("g0", "new.rs")],
            ..Default::default()
        };
        assert_eq!(
            BranchInference::default().infer(&snapshot, "new.rs"),
            Assignment::NotInBranch
        );
        assert!(!has_multi_branch_hunks(&snapshot, "new.rs"));
    }

    #[test]
    fn split_across_stacks_is_multi_branch() {
        let snapshot = StatusSnapshot {
            stacks: vec![
                staged(Stack::new("s1", vec![Branch::new("b1", "one")]), "shared.rs"),
                staged(Stack::new("s2", vec![Branch::new("b2", "two")]), "shared.rs"),
            ],
            ..Default::default()
        };
        assert!(has_multi_branch_hunks(&snapshot, "shared.rs"));
    }

    #[test]
    fn staged_where_committed_is_not_split() {
        let branch = Branch::new("b1", "one").with_commit(Commit::local("c", "m", &["a.rs"]));
        let snapshot = StatusSnapshot {
            stacks: vec![staged(Stack::new("s1", vec![branch]), "a.rs")],
            ..Default::default()
        };
        assert!(!has_multi_branch_hunks(&snapshot, "a.rs"));
    }
}
