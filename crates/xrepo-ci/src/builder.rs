//! Build execution.
//!
//! A [`Builder`] runs one build in a workspace and classifies the result.
//! [`CommandBuilder`] is the process-backed implementation: output is drained
//! while the child runs so a timed-out build still reports what it printed.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use xrepo_core::config::DEFAULT_OUTPUT_TAIL_LINES;

use crate::capture::Capture;
use crate::outcome::{combine_output, BuildError, BuildOutcome};
use crate::preset::BuildCommand;

/// Something that can run a verification build.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Run the build rooted at `workspace`.
    async fn run(&self, workspace: &Path) -> BuildOutcome;
}

/// Runs a [`BuildCommand`] as a child process.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: BuildCommand,
    tail_lines: usize,
}

impl CommandBuilder {
    pub fn new(command: BuildCommand) -> Self {
        Self {
            command,
            tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
        }
    }

    /// Number of output lines per stream kept in failure details.
    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    pub fn command(&self) -> &BuildCommand {
        &self.command
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    fn name(&self) -> &str {
        &self.command.name
    }

    async fn run(&self, workspace: &Path) -> BuildOutcome {
        let command_line = self.command.display();
        let Some((exe, args)) = self.command.command.split_first() else {
            return BuildOutcome::Failure(BuildError::Spawn {
                command: command_line,
                message: "empty command".to_string(),
            });
        };

        let start = Instant::now();
        let spawned = Command::new(exe)
            .args(args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command_line, error = %e, "Build command failed to start");
                return BuildOutcome::Failure(BuildError::Spawn {
                    command: command_line,
                    message: e.to_string(),
                });
            }
        };
        debug!(command = %command_line, workspace = %workspace.display(), "Build started");

        let stdout = Capture::start(child.stdout.take(), self.tail_lines);
        let stderr = Capture::start(child.stderr.take(), self.tail_lines);

        let limit = Duration::from_secs(self.command.timeout_secs);
        let waited = tokio::time::timeout(limit, child.wait()).await;

        let outcome = match waited {
            Ok(Ok(status)) => classify_exit(status, drain(stdout, stderr).await),
            Ok(Err(e)) => {
                // The child may still be running; dropping it kills it.
                drop(child);
                let output = drain(stdout, stderr).await;
                BuildOutcome::Failure(BuildError::Failure {
                    exit_code: None,
                    signal: None,
                    output: format!("waiting for build failed: {e}\n{output}"),
                })
            }
            Err(_) => {
                warn!(
                    command = %command_line,
                    limit_secs = self.command.timeout_secs,
                    "Build exceeded time budget, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out build");
                }
                BuildOutcome::Failure(BuildError::Timeout {
                    limit_secs: self.command.timeout_secs,
                    output: drain(stdout, stderr).await,
                })
            }
        };

        info!(
            command = %command_line,
            duration_ms = start.elapsed().as_millis() as u64,
            success = outcome.is_success(),
            "Build finished"
        );
        outcome
    }
}

/// Finish both readers together so their grace periods overlap.
async fn drain(stdout: Capture, stderr: Capture) -> String {
    let (out, err) = tokio::join!(stdout.finish(), stderr.finish());
    combine_output(&out, &err)
}

fn classify_exit(status: ExitStatus, output: String) -> BuildOutcome {
    if status.success() {
        return BuildOutcome::Success;
    }
    BuildOutcome::Failure(BuildError::Failure {
        exit_code: status.code(),
        signal: exit_signal(&status),
        output,
    })
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
