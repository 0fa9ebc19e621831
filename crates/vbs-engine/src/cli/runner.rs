//! Process runner seam
//!
//! [`CommandRunner`] is the only place the engine touches the operating
//! system to talk to the branch tool. Production uses [`ProcessRunner`];
//! tests swap in [`crate::cli::MockBranchCli`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Argument vector plus optional stdin for one CLI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

/// Captured result of one CLI call. `exit_code` is `None` when the process
/// was terminated by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one branch CLI invocation to completion.
///
/// Implementations report launch failures as `Err`; a process that ran and
/// exited non-zero is an `Ok(RawOutput)` for the classifier to judge.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<RawOutput>;
}

/// Spawns the real branch CLI as a child process in the workspace root.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: String,
    workdir: PathBuf,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<RawOutput> {
        let mut command = Command::new(&self.binary);
        command
            .args(&invocation.args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The executor enforces timeouts by dropping this future.
            .kill_on_drop(true);
        command.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn()?;
        if let Some(payload) = invocation.stdin.as_deref() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        Ok(RawOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_runner_captures_exit_and_streams() {
        let runner = ProcessRunner::new("sh", std::env::temp_dir());
        let output = runner
            .run(&Invocation {
                args: vec!["-c".into(), "echo out; echo err >&2; exit 3".into()],
                stdin: None,
            })
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn process_runner_feeds_stdin() {
        let runner = ProcessRunner::new("cat", std::env::temp_dir());
        let output = runner
            .run(&Invocation {
                args: vec![],
                stdin: Some("{\"session_id\":\"x\"}".into()),
            })
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout, "{\"session_id\":\"x\"}");
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let runner = ProcessRunner::new("/definitely/not/a/binary", std::env::temp_dir());
        let result = runner
            .run(&Invocation {
                args: vec![],
                stdin: None,
            })
            .await;
        assert!(result.is_err());
    }
}
