//! Branch CLI integration
//!
//! The external virtual-branch tool is driven purely as a child process:
//! arguments and stdin in, stdout/stderr/exit code out.

pub mod classify;
pub mod command;
pub mod executor;
pub mod mock;
pub mod runner;
pub mod status;

pub use classify::{Classification, FailureReason, classify, failure_reason};
pub use command::{BranchCommand, Subcommand};
pub use executor::{CommandError, CommandExecutor, CommandOutcome, RetryPolicy};
pub use mock::{MockBranchCli, MockCall};
pub use runner::{CommandRunner, Invocation, ProcessRunner, RawOutput};
pub use status::{Branch, BranchStatus, Commit, FileChange, Stack, StatusSnapshot};
