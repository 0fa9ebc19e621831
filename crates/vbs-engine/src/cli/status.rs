//! Workspace status snapshot as reported by `status --json`
//!
//! Every field is defaulted so older or newer tool versions that omit or add
//! fields still decode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSnapshot {
    pub unassigned_changes: Vec<FileChange>,
    pub stacks: Vec<Stack>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileChange {
    pub cli_id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stack {
    pub cli_id: String,
    /// Staged-but-uncommitted changes in this stack.
    pub assigned_changes: Vec<FileChange>,
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Branch {
    pub cli_id: String,
    pub name: String,
    pub branch_status: BranchStatus,
    /// Newest first.
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Commit {
    pub cli_id: String,
    pub commit_id: String,
    pub message: String,
    pub pushed: bool,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BranchStatus {
    #[default]
    CompletelyUnpushed,
    NothingToPush,
    UnpushedCommits,
    UnpushedCommitsRequiringForce,
    Integrated,
    #[serde(other)]
    Unknown,
}

/// Path equality that tolerates a leading `./` on either side.
pub fn same_path(a: &str, b: &str) -> bool {
    a.trim_start_matches("./") == b.trim_start_matches("./")
}

impl Branch {
    /// No commit of this branch has reached a remote.
    pub fn is_fully_local(&self) -> bool {
        self.branch_status == BranchStatus::CompletelyUnpushed
            && self.commits.iter().all(|c| !c.pushed)
    }

    pub fn head_commit(&self) -> Option<&Commit> {
        self.commits.first()
    }

    /// Files touched by this branch's commits.
    pub fn committed_files(&self) -> impl Iterator<Item = &str> {
        self.commits
            .iter()
            .flat_map(|c| c.changes.iter())
            .map(|c| c.file_path.as_str())
    }

    pub fn touches(&self, path: &str) -> bool {
        self.committed_files().any(|f| same_path(f, path))
    }
}

impl Stack {
    pub fn stages(&self, path: &str) -> bool {
        self.assigned_changes
            .iter()
            .any(|c| same_path(&c.file_path, path))
    }
}

impl StatusSnapshot {
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.stacks.iter().flat_map(|s| s.branches.iter())
    }

    pub fn branch_by_name(&self, name: &str) -> Option<&Branch> {
        self.branches().find(|b| b.name == name)
    }

    pub fn branch_by_id(&self, cli_id: &str) -> Option<&Branch> {
        self.branches().find(|b| b.cli_id == cli_id)
    }

    /// First branch whose commits touch `path`.
    pub fn branch_committing(&self, path: &str) -> Option<&Branch> {
        self.branches().find(|b| b.touches(path))
    }

    pub fn stacks_staging<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Stack> + 'a {
        self.stacks.iter().filter(move |s| s.stages(path))
    }

    pub fn unassigned(&self, path: &str) -> Option<&FileChange> {
        self.unassigned_changes
            .iter()
            .find(|c| same_path(&c.file_path, path))
    }
}

// ---------------------------------------------------------------------------
// Builders, handy for tests and mocks
// ---------------------------------------------------------------------------

impl FileChange {
    pub fn new(cli_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            cli_id: cli_id.into(),
            file_path: file_path.into(),
        }
    }
}

impl Commit {
    pub fn local(cli_id: impl Into<String>, message: impl Into<String>, files: &[&str]) -> Self {
        let cli_id = cli_id.into();
        Self {
            commit_id: format!("{cli_id}0000"),
            changes: files
                .iter()
                .enumerate()
                .map(|(i, f)| FileChange::new(format!("{cli_id}-{i}"), *f))
                .collect(),
            cli_id,
            message: message.into(),
            pushed: false,
        }
    }
}

impl Branch {
    pub fn new(cli_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cli_id: cli_id.into(),
            name: name.into(),
            branch_status: BranchStatus::CompletelyUnpushed,
            commits: Vec::new(),
        }
    }

    pub fn with_commit(mut self, commit: Commit) -> Self {
        self.commits.push(commit);
        self
    }
}

impl Stack {
    pub fn new(cli_id: impl Into<String>, branches: Vec<Branch>) -> Self {
        Self {
            cli_id: cli_id.into(),
            assigned_changes: Vec::new(),
            branches,
        }
    }

    pub fn with_staged(mut self, change: FileChange) -> Self {
        self.assigned_changes.push(change);
        self
    }
}
