//! Engine instance for one workspace root
//!
//! [`SyncEngine`] owns every mutable map, cache and guard for its workspace.
//! Nothing is process-global, so several engines (one per workspace, or one
//! per test) run side by side without interfering.

use crate::assignment::{Assignment, AssignmentCache, BranchAssigner, BranchInference};
use crate::cli::{
    BranchCommand, CommandExecutor, CommandOutcome, CommandRunner, ProcessRunner, RetryPolicy,
};
use crate::conversation::ConversationId;
use crate::error::EngineError;
use crate::host::events::{edit_target, execution_id};
use crate::host::{HostEvent, HostPlatform, ToolKind};
use crate::lock::LockCoordinator;
use crate::locked;
use crate::notify::NotificationManager;
use crate::reconcile::MessageGenerator;
use crate::session::SessionResolver;
use crate::state::{ClaimOutcome, PluginState};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vbranch_sync_core::home::get_home_dir;
use vbranch_sync_core::io::StoreError;
use vbranch_sync_core::{Config, ConfigOverrides, resolve_config};

const SESSIONS_FILE: &str = "sessions.json";
const STATE_FILE: &str = "state.json";

/// Why an edit was not attached automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VetoReason {
    /// The file's changes are split across branches.
    MultiBranchHunks,
}

/// Result of the edit pipeline for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// `branch` is `None` when inference named no single branch.
    Attached { branch: Option<String> },
    Vetoed { reason: VetoReason },
    /// The branch tool hit a reference race; the attach was skipped.
    Skipped { detail: String },
    Failed { error: String },
}

pub struct SyncEngine {
    pub(crate) workspace_root: PathBuf,
    pub(crate) config: Config,
    pub(crate) executor: CommandExecutor,
    pub(crate) host: Arc<dyn HostPlatform>,
    pub(crate) sessions: Arc<SessionResolver>,
    pub(crate) state: PluginState,
    pub(crate) locks: LockCoordinator,
    pub(crate) assigner: BranchAssigner,
    pub(crate) notifications: NotificationManager,
    pub(crate) messages: MessageGenerator,
    pub(crate) default_branch: Regex,
    /// Files edited per conversation since its last reconciliation.
    pub(crate) turn_edits: Mutex<HashMap<ConversationId, BTreeSet<String>>>,
    /// Conversations with a reconciliation pass running.
    pub(crate) in_flight: Mutex<HashSet<ConversationId>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Build an engine for `workspace_root`, loading persisted state from the
    /// configured state directory.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the root is not a directory or the
    /// configuration does not validate.
    pub fn open(
        workspace_root: impl Into<PathBuf>,
        config: Config,
        runner: Arc<dyn CommandRunner>,
        host: Arc<dyn HostPlatform>,
    ) -> Result<Arc<Self>, EngineError> {
        let workspace_root = workspace_root.into();
        if !workspace_root.is_dir() {
            return Err(EngineError::Workspace {
                path: workspace_root,
            });
        }
        config.validate()?;
        let default_branch = Regex::new(&config.reconcile.default_branch_pattern).map_err(
            |source| EngineError::BranchPattern {
                pattern: config.reconcile.default_branch_pattern.clone(),
                source,
            },
        )?;

        let state_dir = config.state_dir(&workspace_root);
        let sessions = Arc::new(SessionResolver::open(state_dir.join(SESSIONS_FILE)));
        let state = PluginState::open(state_dir.join(STATE_FILE));
        let executor = CommandExecutor::new(runner, RetryPolicy::from_config(&config.commands));
        let assigner = BranchAssigner::new(
            AssignmentCache::new(config.cache.ttl()),
            BranchInference::new(&config.inference),
        );
        let notifications =
            NotificationManager::new(Arc::clone(&sessions), config.notifications.ttl());

        info!(
            workspace = %workspace_root.display(),
            state_dir = %state_dir.display(),
            "vbranch-sync engine ready"
        );

        Ok(Arc::new(Self {
            locks: LockCoordinator::new(&config.locks),
            messages: MessageGenerator::new(&config.reconcile),
            workspace_root,
            executor,
            host,
            sessions,
            state,
            assigner,
            notifications,
            default_branch,
            turn_edits: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            config,
        }))
    }

    /// Engine driving the real branch CLI binary from the configuration.
    pub fn with_process_runner(
        workspace_root: impl Into<PathBuf>,
        config: Config,
        host: Arc<dyn HostPlatform>,
    ) -> Result<Arc<Self>, EngineError> {
        let workspace_root = workspace_root.into();
        let runner = Arc::new(ProcessRunner::new(
            config.core.cli_binary.clone(),
            workspace_root.clone(),
        ));
        Self::open(workspace_root, config, runner, host)
    }

    /// Resolve layered configuration for `workspace_root` (global file,
    /// repo-local `.vbranch-sync.toml`, environment, `overrides`) and build
    /// an engine driving the configured branch CLI.
    pub fn discover(
        workspace_root: impl Into<PathBuf>,
        overrides: &ConfigOverrides,
        host: Arc<dyn HostPlatform>,
    ) -> Result<Arc<Self>, EngineError> {
        let workspace_root = workspace_root.into();
        let home = get_home_dir().map_err(|e| EngineError::Home {
            message: format!("{e:#}"),
        })?;
        let config = resolve_config(overrides, &workspace_root, &home)?;
        Self::with_process_runner(workspace_root, config, host)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionResolver {
        &self.sessions
    }

    pub fn state(&self) -> &PluginState {
        &self.state
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn assigner(&self) -> &BranchAssigner {
        &self.assigner
    }

    /// Conversation id of the root of `session_id`.
    pub fn conversation_for(&self, session_id: &str) -> ConversationId {
        let root = self.sessions.resolve_root(session_id);
        self.conversation_for_root(&root)
    }

    pub(crate) fn conversation_for_root(&self, root_session_id: &str) -> ConversationId {
        ConversationId::for_root(
            root_session_id,
            self.config.core.branch_seed_override.as_deref(),
        )
    }

    /// Queued operator notifications for the root of `session_id`, drained.
    pub fn pending_notifications(&self, session_id: &str) -> Option<String> {
        self.notifications.consume(session_id)
    }

    /// Decode and handle one raw host event. Never fails; undecodable events
    /// are skipped.
    pub async fn handle_event(&self, raw: &Value) {
        match HostEvent::decode(raw) {
            Some(event) => self.handle(event).await,
            None => debug!("skipping undecodable host event"),
        }
    }

    pub async fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::ToolStarted {
                session_id,
                call_id,
                tool,
                args,
            } => match ToolKind::of(&tool) {
                ToolKind::Spawn => self.sessions.track_spawn(&session_id, &call_id, None),
                ToolKind::Edit => {
                    if let Some(path) = edit_target(&args) {
                        let path = self.relative_path(&path);
                        let outcome = self.locks.acquire(&path, &session_id, &tool).await;
                        if outcome.was_contended() {
                            warn!(
                                session_id = %session_id,
                                path = %path,
                                "edit lock was contended: {:?}", outcome
                            );
                        } else {
                            debug!(
                                session_id = %session_id,
                                path = %path,
                                "edit lock: {:?}", outcome
                            );
                        }
                    }
                }
                ToolKind::Other => {}
            },
            HostEvent::ToolExecuted {
                session_id,
                call_id,
                tool,
                args,
                metadata,
            } => match ToolKind::of(&tool) {
                ToolKind::Spawn => {
                    let execution = execution_id(&metadata);
                    self.sessions
                        .track_spawn(&session_id, &call_id, execution.as_deref());
                }
                ToolKind::Edit => match edit_target(&args) {
                    Some(path) => {
                        let outcome = self.record_edit(&session_id, &path, &tool, &args).await;
                        debug!(
                            session_id = %session_id,
                            path = %path,
                            "edit pipeline: {:?}", outcome
                        );
                    }
                    None => {
                        debug!(session_id = %session_id, tool = %tool, "edit without a target path")
                    }
                },
                ToolKind::Other => {}
            },
            HostEvent::SessionCreated {
                session_id,
                parent_id,
            } => self
                .sessions
                .track_session_created(&session_id, parent_id.as_deref()),
            HostEvent::SessionIdle { session_id } => {
                let outcome = self.on_idle(&session_id).await;
                debug!(session_id = %session_id, "idle: {:?}", outcome);
            }
            HostEvent::SessionDeleted { session_id } => self.forget_session(&session_id),
        }
    }

    /// Edit pipeline for one file: claim, record, infer, attach. The file
    /// lock is released on every path.
    pub async fn record_edit(
        &self,
        session_id: &str,
        path: &str,
        tool: &str,
        tool_input: &Value,
    ) -> EditOutcome {
        let path = self.relative_path(path);
        let _lock = self.locks.lock(&path, session_id, tool).await;

        let root = self.sessions.resolve_root(session_id);
        let conversation = self.conversation_for_root(&root);

        if let ClaimOutcome::Collision { existing_root } = self.state.claim(&conversation, &root) {
            self.notifications.enqueue(
                &root,
                format!(
                    "conversation {conversation} is already owned by session {existing_root}; \
                     edits are attached but ownership was not changed"
                ),
            );
        }
        self.state.mark_edited(&conversation);
        locked(&self.turn_edits)
            .entry(conversation.clone())
            .or_default()
            .insert(path.clone());

        let mut branch = None;
        match self
            .assigner
            .lookup(&self.executor, &conversation, &path)
            .await
        {
            Ok(Some(lookup)) => {
                if lookup.multi_branch {
                    warn!(path = %path, "changes split across branches, not attaching");
                    self.notifications.enqueue(
                        &root,
                        format!(
                            "{path} has changes in more than one branch; resolve it manually"
                        ),
                    );
                    return EditOutcome::Vetoed {
                        reason: VetoReason::MultiBranchHunks,
                    };
                }
                match lookup.assignment {
                    Assignment::Ambiguous { candidates } => {
                        info!(path = %path, ?candidates, "no clear branch, attaching unassigned");
                    }
                    Assignment::Branch { branch_name, .. } => {
                        match self.state.owned_branch(&conversation) {
                            None => {
                                self.state
                                    .set_branch_name(&conversation, &root, &branch_name);
                            }
                            Some(owned) if owned != branch_name => {
                                self.notifications.enqueue(
                                    &root,
                                    format!(
                                        "{path} already belongs to branch {branch_name}, \
                                         not this session's branch {owned}"
                                    ),
                                );
                            }
                            Some(_) => {}
                        }
                        branch = Some(branch_name);
                    }
                    Assignment::NotInBranch => {}
                }
            }
            Ok(None) => {
                debug!(path = %path, "no status available, attaching without inference")
            }
            Err(e) => warn!(path = %path, "assignment lookup failed, attaching anyway: {}", e),
        }

        let command = BranchCommand::AttachEdit {
            conversation_id: conversation.to_string(),
            file_path: path.clone(),
            tool_name: tool.to_string(),
            tool_input: tool_input.clone(),
        };
        match self.executor.run(&command).await {
            Ok(CommandOutcome::Skipped { detail }) => EditOutcome::Skipped { detail },
            Ok(_) => EditOutcome::Attached { branch },
            Err(e) => {
                warn!(path = %path, "attaching edit failed: {}", e);
                EditOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Spawn the periodic stale-lock reaper. Stops when `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.locks.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("lock reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = engine.locks.reap();
                        let expired = engine.assigner.cache().purge_expired();
                        if reaped > 0 || expired > 0 {
                            debug!(
                                "reaper dropped {} stale lock(s), {} cache entries",
                                reaped, expired
                            );
                        }
                    }
                }
            }
        })
    }

    /// Await a flush of both state documents.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.sessions.flush().await?;
        self.state.flush().await
    }

    fn forget_session(&self, session_id: &str) {
        if !self.sessions.is_root(session_id) {
            return;
        }
        let dropped = self.notifications.discard(session_id);
        let conversation = self.conversation_for_root(session_id);
        // An override seed shares the conversation with other roots.
        if self.config.core.branch_seed_override.is_none() {
            locked(&self.turn_edits).remove(&conversation);
        }
        debug!(session_id, dropped, "forgot deleted session");
    }

    /// Workspace-relative form of `path` when it lies inside the root.
    pub(crate) fn relative_path(&self, path: &str) -> String {
        let candidate = Path::new(path);
        let relative = candidate
            .strip_prefix(&self.workspace_root)
            .unwrap_or(candidate);
        relative
            .to_string_lossy()
            .trim_start_matches("./")
            .replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{
        Branch, Commit, FileChange, MockBranchCli, RawOutput, Stack, StatusSnapshot, Subcommand,
    };
    use crate::host::MockHost;
    use serde_json::json;
    use serial_test::serial;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn engine(dir: &TempDir, mock: &MockBranchCli) -> Arc<SyncEngine> {
        SyncEngine::open(
            dir.path(),
            Config::default(),
            Arc::new(mock.clone()),
            Arc::new(MockHost::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn open_rejects_missing_root_and_bad_pattern() {
        let dir = TempDir::new().unwrap();
        let missing = SyncEngine::open(
            dir.path().join("nope"),
            Config::default(),
            Arc::new(MockBranchCli::new()),
            Arc::new(MockHost::new()),
        );
        assert!(matches!(missing, Err(EngineError::Workspace { .. })));

        let mut config = Config::default();
        config.reconcile.default_branch_pattern = "(".into();
        let bad = SyncEngine::open(
            dir.path(),
            config,
            Arc::new(MockBranchCli::new()),
            Arc::new(MockHost::new()),
        );
        assert!(bad.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn discover_reads_repo_local_config() {
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(repo.path().join(".git")).unwrap();
        std::fs::write(
            repo.path().join(".vbranch-sync.toml"),
            "[core]\ncli_binary = \"but-dev\"\n\n[reconcile]\ncleanup_max_attempts = 5\n",
        )
        .unwrap();
        // SAFETY: serialised by `#[serial]`
        unsafe {
            std::env::set_var("VBS_HOME", home.path());
            std::env::remove_var("VBS_CLI_BINARY");
        }

        let engine = SyncEngine::discover(
            repo.path(),
            &ConfigOverrides::default(),
            Arc::new(MockHost::new()),
        )
        .unwrap();
        assert_eq!(engine.config().core.cli_binary, "but-dev");
        assert_eq!(engine.config().reconcile.cleanup_max_attempts, 5);

        unsafe {
            std::env::remove_var("VBS_HOME");
        }
    }

    #[tokio::test]
    async fn edit_attaches_with_conversation_payload() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let engine = engine(&dir, &mock);

        let abs = dir.path().join("src/a.rs");
        let outcome = engine
            .record_edit("ses_a", abs.to_str().unwrap(), "edit", &json!({"oldString": "x"}))
            .await;
        assert_eq!(outcome, EditOutcome::Attached { branch: None });

        let attach = &mock.calls_for(Subcommand::Attach)[0];
        let payload = attach.payload().unwrap();
        assert_eq!(payload["session_id"], engine.conversation_for("ses_a").as_str());
        assert_eq!(payload["tool_input"]["file_path"], "src/a.rs");
        assert!(engine.locks().holder("src/a.rs").is_none());
        assert!(engine.state().has_edits(&engine.conversation_for("ses_a")));
    }

    #[tokio::test]
    async fn split_file_is_vetoed_and_operator_notified() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        mock.set_status(StatusSnapshot {
            stacks: vec![
                Stack::new("s1", vec![Branch::new("b1", "one")])
                    .with_staged(FileChange::new("h1", "shared.rs")),
                Stack::new("s2", vec![Branch::new("b2", "two")])
                    .with_staged(FileChange::new("h2", "shared.rs")),
            ],
            ..Default::default()
        });
        let engine = engine(&dir, &mock);

        let outcome = engine.record_edit("ses_a", "shared.rs", "edit", &json!({})).await;
        assert_eq!(
            outcome,
            EditOutcome::Vetoed {
                reason: VetoReason::MultiBranchHunks
            }
        );
        assert!(mock.calls_for(Subcommand::Attach).is_empty());
        let block = engine.pending_notifications("ses_a").unwrap();
        assert!(block.contains("shared.rs has changes in more than one branch"));
    }

    #[tokio::test]
    async fn foreign_branch_edit_notifies() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        mock.set_status(StatusSnapshot {
            stacks: vec![Stack::new(
                "s1",
                vec![
                    Branch::new("b1", "mine").with_commit(Commit::local("c1", "m", &["a.rs"])),
                    Branch::new("b2", "theirs").with_commit(Commit::local("c2", "m", &["b.rs"])),
                ],
            )],
            ..Default::default()
        });
        let engine = engine(&dir, &mock);

        engine.record_edit("ses_a", "a.rs", "edit", &json!({})).await;
        let outcome = engine.record_edit("ses_a", "b.rs", "edit", &json!({})).await;
        assert_eq!(
            outcome,
            EditOutcome::Attached {
                branch: Some("theirs".into())
            }
        );
        let conv = engine.conversation_for("ses_a");
        assert_eq!(engine.state().owned_branch(&conv).as_deref(), Some("mine"));
        assert!(
            engine
                .pending_notifications("ses_a")
                .unwrap()
                .contains("b.rs already belongs to branch theirs")
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn seed_override_collision_is_logged_and_queued() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let mut config = Config::default();
        config.core.branch_seed_override = Some("shared".into());
        let engine = SyncEngine::open(
            dir.path(),
            config,
            Arc::new(mock.clone()),
            Arc::new(MockHost::new()),
        )
        .unwrap();

        engine.record_edit("ses_a", "a.rs", "edit", &json!({})).await;
        let outcome = engine.record_edit("ses_b", "b.rs", "edit", &json!({})).await;
        assert_eq!(outcome, EditOutcome::Attached { branch: None });
        assert_eq!(engine.conversation_for("ses_a"), engine.conversation_for("ses_b"));

        assert!(logs_contain("already owned by root"));
        let block = engine.pending_notifications("ses_b").unwrap();
        assert!(block.contains("already owned by session ses_a"));
        assert!(engine.pending_notifications("ses_a").is_none());
    }

    #[tokio::test]
    async fn fatal_attach_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        mock.fail_launch(Subcommand::Attach);
        let engine = engine(&dir, &mock);
        let outcome = engine.record_edit("ses_a", "a.rs", "write", &json!({})).await;
        assert!(matches!(outcome, EditOutcome::Failed { .. }));
        assert!(engine.locks().holder("a.rs").is_none());
    }

    #[tokio::test]
    async fn tied_candidates_attach_without_a_branch() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        mock.set_status(StatusSnapshot {
            stacks: vec![
                Stack::new(
                    "s1",
                    vec![
                        Branch::new("b1", "left")
                            .with_commit(Commit::local("c1", "x", &["src/a/one.rs"])),
                        Branch::new("b2", "right")
                            .with_commit(Commit::local("c2", "y", &["src/b/two.rs"])),
                    ],
                )
                .with_staged(FileChange::new("h1", "src/c/three.rs")),
            ],
            ..Default::default()
        });
        let engine = engine(&dir, &mock);

        let outcome = engine.record_edit("ses_a", "src/c/three.rs", "edit", &json!({})).await;
        assert_eq!(outcome, EditOutcome::Attached { branch: None });
        assert_eq!(mock.calls_for(Subcommand::Attach).len(), 1);
        let conv = engine.conversation_for("ses_a");
        assert!(engine.state().owned_branch(&conv).is_none());
        assert!(engine.pending_notifications("ses_a").is_none());
    }

    #[tokio::test]
    async fn reference_race_on_attach_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        mock.script(
            Subcommand::Attach,
            RawOutput::failure(1, "reference mismatch for refs/heads/branch-1"),
        );
        let engine = engine(&dir, &mock);

        let outcome = engine.record_edit("ses_a", "a.rs", "edit", &json!({})).await;
        match outcome {
            EditOutcome::Skipped { detail } => assert!(detail.contains("reference mismatch")),
            other => panic!("expected a skipped attach, got {other:?}"),
        }
        assert_eq!(mock.calls_for(Subcommand::Attach).len(), 1);
        assert!(engine.locks().holder("a.rs").is_none());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn contended_edit_lock_is_logged() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let engine = engine(&dir, &mock);
        engine.locks().acquire("src/x.rs", "ses_a", "edit").await;

        engine
            .handle_event(&json!({
                "type": "tool.execute.before",
                "properties": {"sessionID": "ses_b", "callID": "call_1", "tool": "edit",
                               "args": {"filePath": "src/x.rs"}}
            }))
            .await;
        assert_eq!(engine.locks().holder("src/x.rs").unwrap().owner_session, "ses_b");
        assert!(logs_contain("edit lock was contended"));
    }

    #[tokio::test]
    async fn host_events_route_to_components() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let engine = engine(&dir, &mock);

        engine
            .handle_event(&json!({
                "type": "tool.execute.before",
                "properties": {"sessionID": "ses_a", "callID": "call_1", "tool": "task", "args": {}}
            }))
            .await;
        engine
            .handle_event(&json!({
                "type": "tool.execute.after",
                "properties": {"sessionID": "ses_a", "callID": "call_1", "tool": "task",
                               "args": {}, "metadata": {"sessionId": "ses_sub"}}
            }))
            .await;
        assert_eq!(engine.sessions().resolve_root("ses_sub"), "ses_a");

        engine
            .handle_event(&json!({
                "type": "tool.execute.before",
                "properties": {"sessionID": "ses_sub", "callID": "call_2", "tool": "edit",
                               "args": {"filePath": "src/x.rs"}}
            }))
            .await;
        assert_eq!(engine.locks().holder("src/x.rs").unwrap().owner_session, "ses_sub");

        engine
            .handle_event(&json!({
                "type": "tool.execute.after",
                "properties": {"sessionID": "ses_sub", "callID": "call_2", "tool": "edit",
                               "args": {"filePath": "src/x.rs"}, "metadata": {}}
            }))
            .await;
        assert!(engine.locks().holder("src/x.rs").is_none());
        assert_eq!(mock.calls_for(Subcommand::Attach).len(), 1);

        engine.handle_event(&json!({"type": "bogus"})).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_runs_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let engine = engine(&dir, &mock);
        engine.locks().acquire("a.rs", "ses_a", "edit").await;

        let cancel = CancellationToken::new();
        let handle = engine.spawn_reaper(cancel.clone());
        tokio::time::sleep(std::time::Duration::from_secs(95)).await;
        assert!(engine.locks().holder("a.rs").is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn deleted_root_drops_queued_notifications() {
        let dir = TempDir::new().unwrap();
        let mock = MockBranchCli::new();
        let engine = engine(&dir, &mock);
        engine.notifications.enqueue("ses_a", "hello");
        engine
            .handle_event(&json!({
                "type": "session.deleted",
                "properties": {"info": {"id": "ses_a"}}
            }))
            .await;
        assert!(engine.pending_notifications("ses_a").is_none());
    }
}
