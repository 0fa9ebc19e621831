//! Mock branch CLI for testing
//!
//! Provides a scripted [`CommandRunner`] that never launches a process.
//! Used by unit tests and the integration suite on every platform.

use super::command::Subcommand;
use super::runner::{CommandRunner, Invocation, RawOutput};
use super::status::StatusSnapshot;
use crate::locked;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Call record for mock CLI invocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub subcommand: Subcommand,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl MockCall {
    /// Parsed stdin payload, if any.
    pub fn payload(&self) -> Option<serde_json::Value> {
        self.stdin
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

/// Shared state for the mock CLI
#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    /// Status replies; the front is served and popped while more than one
    /// remains, the last one is sticky.
    statuses: VecDeque<StatusSnapshot>,
    scripted: HashMap<Subcommand, VecDeque<RawOutput>>,
    launch_failures: HashSet<Subcommand>,
    delays: HashMap<Subcommand, Duration>,
}

/// Scripted branch CLI
///
/// Unscripted commands succeed with empty stdout; unscripted `status`
/// serves the status sequence (an empty snapshot by default).
#[derive(Debug, Clone, Default)]
pub struct MockBranchCli {
    state: Arc<Mutex<MockState>>,
}

impl MockBranchCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status sequence with a single sticky snapshot.
    pub fn set_status(&self, snapshot: StatusSnapshot) {
        let mut state = locked(&self.state);
        state.statuses.clear();
        state.statuses.push_back(snapshot);
    }

    /// Append a snapshot to the status sequence.
    pub fn push_status(&self, snapshot: StatusSnapshot) {
        locked(&self.state).statuses.push_back(snapshot);
    }

    /// Queue a raw reply for the next call of `subcommand`.
    pub fn script(&self, subcommand: Subcommand, output: RawOutput) {
        locked(&self.state)
            .scripted
            .entry(subcommand)
            .or_default()
            .push_back(output);
    }

    /// The next `times` calls of `subcommand` exit 1 with `stderr`.
    pub fn fail_times(&self, subcommand: Subcommand, times: usize, stderr: &str) {
        for _ in 0..times {
            self.script(subcommand, RawOutput::failure(1, stderr));
        }
    }

    /// Every call of `subcommand` fails to launch.
    pub fn fail_launch(&self, subcommand: Subcommand) {
        locked(&self.state).launch_failures.insert(subcommand);
    }

    /// Every call of `subcommand` sleeps for `delay` before replying.
    pub fn set_delay(&self, subcommand: Subcommand, delay: Duration) {
        locked(&self.state).delays.insert(subcommand, delay);
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<MockCall> {
        locked(&self.state).calls.clone()
    }

    pub fn calls_for(&self, subcommand: Subcommand) -> Vec<MockCall> {
        locked(&self.state)
            .calls
            .iter()
            .filter(|c| c.subcommand == subcommand)
            .cloned()
            .collect()
    }

    /// Clear all recorded calls
    pub fn clear_calls(&self) {
        locked(&self.state).calls.clear();
    }

    fn reply(state: &mut MockState, subcommand: Subcommand) -> std::io::Result<RawOutput> {
        if state.launch_failures.contains(&subcommand) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock: branch CLI binary not found",
            ));
        }
        if let Some(output) = state
            .scripted
            .get_mut(&subcommand)
            .and_then(VecDeque::pop_front)
        {
            return Ok(output);
        }
        if subcommand != Subcommand::Status {
            return Ok(RawOutput::success(""));
        }

        let snapshot = if state.statuses.len() > 1 {
            state.statuses.pop_front().unwrap_or_default()
        } else {
            state.statuses.front().cloned().unwrap_or_default()
        };
        let json = serde_json::to_string(&snapshot).map_err(std::io::Error::other)?;
        Ok(RawOutput::success(json))
    }
}

#[async_trait]
impl CommandRunner for MockBranchCli {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<RawOutput> {
        let Some(subcommand) = Subcommand::from_args(&invocation.args) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("mock: unrecognized invocation {:?}", invocation.args),
            ));
        };

        let (delay, reply) = {
            let mut state = locked(&self.state);
            state.calls.push(MockCall {
                subcommand,
                args: invocation.args.clone(),
                stdin: invocation.stdin.clone(),
            });
            let delay = state.delays.get(&subcommand).copied();
            (delay, Self::reply(&mut state, subcommand))
        };
        debug!("Mock: {} {:?}", subcommand, invocation.args);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}
