// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Process runner
//!
//! Runs one planned invocation as a child process, with its combined
//! output written to the invocation's log file.

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::InvocationSpec;
use crate::errors::{BackendFailure, ReconflowError, ReconflowResult};

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit status; -1 when killed by a signal
    Exited(i32),
    /// Killed at the deadline
    TimedOut,
    /// Killed because the run was aborted
    Cancelled,
}

/// Runs invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one invocation until it exits, the deadline passes or `cancel`
    /// fires. A process still running at either point is killed and
    /// reaped before this returns.
    async fn run(
        &self,
        invocation: &InvocationSpec,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ReconflowResult<RunOutcome>;
}

/// Runs invocations as local child processes
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &InvocationSpec,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ReconflowResult<RunOutcome> {
        let log_error = |e: std::io::Error| ReconflowError::FileWriteError {
            path: invocation.log_path.clone(),
            error: e.to_string(),
        };

        let mut log = std::fs::File::create(&invocation.log_path).map_err(log_error)?;
        writeln!(log, "$ {}", invocation.command_line()).map_err(log_error)?;
        let stderr_log = log.try_clone().map_err(log_error)?;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        debug!("{}: {}", invocation.label, invocation.command_line());
        let mut child = cmd.spawn().map_err(|e| ReconflowError::BackendExecution {
            task: invocation.label.clone(),
            kind: BackendFailure::Spawn,
            reason: format!("could not start '{}': {}", invocation.program, e),
            help: Some("Check that the toolkit is installed, or set its path in [tools]".into()),
        })?;

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep_until(deadline) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        match waited {
            Waited::Exited(status) => {
                let status = status.map_err(|e| ReconflowError::BackendExecution {
                    task: invocation.label.clone(),
                    kind: BackendFailure::Internal,
                    reason: format!("could not wait for '{}': {}", invocation.program, e),
                    help: None,
                })?;
                Ok(RunOutcome::Exited(status.code().unwrap_or(-1)))
            }
            Waited::TimedOut => {
                stop(&mut child, &invocation.label).await;
                Ok(RunOutcome::TimedOut)
            }
            Waited::Cancelled => {
                stop(&mut child, &invocation.label).await;
                Ok(RunOutcome::Cancelled)
            }
        }
    }
}

/// Kill a child and wait for it to exit
async fn stop(child: &mut Child, label: &str) {
    if let Err(e) = child.kill().await {
        warn!("Could not kill {}: {}", label, e);
    }
}

/// Last `lines` lines of a log file, empty if it cannot be read
pub async fn read_log_tail(path: &Path, lines: usize) -> String {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return String::new();
    };
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell(dir: &Path, script: &str) -> InvocationSpec {
        InvocationSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: dir.to_path_buf(),
            expected_outputs: vec![],
            log_path: dir.join("step.log"),
            label: "node:step".into(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_exit_status_and_log() {
        let temp = TempDir::new().unwrap();
        let invocation = shell(temp.path(), "echo hello; exit 3");

        let outcome = ProcessRunner
            .run(&invocation, far_deadline(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Exited(3));
        let tail = read_log_tail(&invocation.log_path, 1).await;
        assert_eq!(tail, "hello");
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let temp = TempDir::new().unwrap();
        let invocation = shell(temp.path(), "sleep 30");
        let deadline = Instant::now() + Duration::from_millis(100);

        let started = std::time::Instant::now();
        let outcome = ProcessRunner
            .run(&invocation, deadline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let temp = TempDir::new().unwrap();
        let invocation = shell(temp.path(), "sleep 30");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = ProcessRunner.run(&invocation, far_deadline(), &cancel).await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_program_is_backend_error() {
        let temp = TempDir::new().unwrap();
        let mut invocation = shell(temp.path(), "");
        invocation.program = "reconflow-no-such-tool".into();
        invocation.log_path = temp.path().join("missing.log");

        let err = ProcessRunner
            .run(&invocation, far_deadline(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.backend_failure(), Some(BackendFailure::Spawn));
    }
}
