//! Command executor with per-subcommand retry budgets
//!
//! Runs a [`BranchCommand`] through a [`CommandRunner`], classifies the
//! result and retries contention failures with jittered exponential backoff.
//! Only the fatal case comes back as an error.

use super::classify::{Classification, classify, summarize};
use super::command::{BranchCommand, Subcommand};
use super::runner::{CommandRunner, Invocation};
use super::status::StatusSnapshot;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, warn};
use vbranch_sync_core::config::CommandConfig;

/// Non-fatal result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit 0.
    Completed { stdout: String, attempts: u32 },
    /// Known "nothing to do" failure, treated as success.
    NothingToDo { detail: String },
    /// Transient inconsistency; the step was skipped.
    Skipped { detail: String },
}

impl CommandOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed { .. })
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch `{subcommand}`: {source}")]
    Spawn {
        subcommand: Subcommand,
        #[source]
        source: std::io::Error,
    },

    #[error("`{subcommand}` failed after {attempts} attempt(s): {detail}")]
    Fatal {
        subcommand: Subcommand,
        attempts: u32,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("`{subcommand}` timed out after {attempts} attempt(s)")]
    Timeout { subcommand: Subcommand, attempts: u32 },

    #[error("could not parse `{subcommand}` output: {source}")]
    Parse {
        subcommand: Subcommand,
        #[source]
        source: serde_json::Error,
    },
}

impl CommandError {
    pub fn subcommand(&self) -> Subcommand {
        match self {
            CommandError::Spawn { subcommand, .. }
            | CommandError::Fatal { subcommand, .. }
            | CommandError::Timeout { subcommand, .. }
            | CommandError::Parse { subcommand, .. } => *subcommand,
        }
    }

    /// Diagnostic text used for failure-reason classification.
    pub fn detail(&self) -> String {
        match self {
            CommandError::Fatal { detail, .. } => detail.clone(),
            CommandError::Timeout { .. } => "timed out".to_string(),
            other => other.to_string(),
        }
    }
}

/// Timeout, backoff and retry budgets for every subcommand.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    retries: BTreeMap<Subcommand, u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CommandConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CommandConfig) -> Self {
        let retries = Subcommand::ALL
            .into_iter()
            .map(|sub| {
                let budget = config
                    .retries
                    .get(sub.name())
                    .copied()
                    .unwrap_or_else(|| sub.default_retries());
                (sub, budget)
            })
            .collect();
        for name in config.retries.keys() {
            if Subcommand::from_name(name).is_none() {
                warn!("ignoring retry budget for unknown subcommand '{}'", name);
            }
        }
        Self {
            timeout: config.timeout(),
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
            retries,
        }
    }

    pub fn retries_for(&self, subcommand: Subcommand) -> u32 {
        self.retries
            .get(&subcommand)
            .copied()
            .unwrap_or_else(|| subcommand.default_retries())
    }

    pub fn with_retries(mut self, subcommand: Subcommand, retries: u32) -> Self {
        self.retries.insert(subcommand, retries);
        self
    }

    /// Delay before retry number `attempt` (1-based), jittered to 75%..=125%.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let base = self
            .base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos());
        let pct = 75 + (nanos % 51);
        base * pct / 100
    }
}

/// Runs branch CLI commands with classification and retries.
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, policy: RetryPolicy) -> Self {
        Self { runner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `command` until it succeeds, is classified non-retryable, or the
    /// subcommand's retry budget is spent.
    ///
    /// # Errors
    ///
    /// `CommandError::Spawn` when the process cannot be launched,
    /// `CommandError::Timeout` when every attempt timed out, and
    /// `CommandError::Fatal` for unrecognized failures or exhausted retries.
    pub async fn run(&self, command: &BranchCommand) -> Result<CommandOutcome, CommandError> {
        let subcommand = command.subcommand();
        let max_attempts = self.policy.retries_for(subcommand).saturating_add(1);
        let invocation = Invocation {
            args: command.args(),
            stdin: command.stdin(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let exhausted = attempt >= max_attempts;

            let output = match tokio::time::timeout(
                self.policy.timeout,
                self.runner.run(&invocation),
            )
            .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(source)) => {
                    error!(
                        subcommand = %subcommand,
                        attempt,
                        error = %source,
                        "branch command could not be launched"
                    );
                    return Err(CommandError::Spawn { subcommand, source });
                }
                Err(_) => {
                    if exhausted {
                        error!(
                            subcommand = %subcommand,
                            attempt,
                            "branch command timed out, retries exhausted"
                        );
                        return Err(CommandError::Timeout {
                            subcommand,
                            attempts: attempt,
                        });
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        subcommand = %subcommand,
                        attempt,
                        ?delay,
                        "branch command timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            match classify(&output) {
                Classification::Success => {
                    debug!(subcommand = %subcommand, attempt, "branch command succeeded");
                    return Ok(CommandOutcome::Completed {
                        stdout: output.stdout,
                        attempts: attempt,
                    });
                }
                Classification::Benign => {
                    let detail = summarize(&output);
                    debug!(
                        subcommand = %subcommand,
                        attempt,
                        detail = %detail,
                        "branch command had nothing to do"
                    );
                    return Ok(CommandOutcome::NothingToDo { detail });
                }
                Classification::Race => {
                    let detail = summarize(&output);
                    warn!(
                        subcommand = %subcommand,
                        attempt,
                        detail = %detail,
                        "branch command hit a reference race, skipping"
                    );
                    return Ok(CommandOutcome::Skipped { detail });
                }
                Classification::Transient if !exhausted => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        subcommand = %subcommand,
                        attempt,
                        ?delay,
                        "branch command contended ({}), retrying",
                        summarize(&output)
                    );
                    tokio::time::sleep(delay).await;
                }
                classification => {
                    let detail = summarize(&output);
                    error!(
                        subcommand = %subcommand,
                        attempt,
                        exit_code = ?output.exit_code,
                        detail = %detail,
                        "branch command failed ({:?})",
                        classification
                    );
                    return Err(CommandError::Fatal {
                        subcommand,
                        attempts: attempt,
                        exit_code: output.exit_code,
                        detail,
                    });
                }
            }
        }
    }

    /// Fetch and decode the workspace status.
    ///
    /// `Ok(None)` means the tool reported a benign or racy condition (for
    /// example the project is not initialized) and there is nothing to read.
    pub async fn status(&self) -> Result<Option<StatusSnapshot>, CommandError> {
        match self.run(&BranchCommand::Status).await? {
            CommandOutcome::Completed { stdout, .. } => serde_json::from_str(&stdout)
                .map(Some)
                .map_err(|source| CommandError::Parse {
                    subcommand: Subcommand::Status,
                    source,
                }),
            CommandOutcome::NothingToDo { .. } | CommandOutcome::Skipped { .. } => Ok(None),
        }
    }
}
