//! Build outcome classification.

use serde::{Deserialize, Serialize};

/// Why a build did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildError {
    /// The command exited non-zero or was killed by a signal.
    #[error("build failed ({})", describe_exit(*exit_code, *signal))]
    Failure {
        exit_code: Option<i32>,
        signal: Option<i32>,
        output: String,
    },

    /// The command exceeded its time budget and was killed.
    #[error("build timed out after {limit_secs}s")]
    Timeout { limit_secs: u64, output: String },

    /// The command could not be started.
    #[error("build command `{command}` could not be started: {message}")]
    Spawn { command: String, message: String },
}

impl BuildError {
    /// Captured output tail, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            BuildError::Failure { output, .. } | BuildError::Timeout { output, .. } => {
                Some(output.as_str()).filter(|o| !o.is_empty())
            }
            BuildError::Spawn { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BuildError::Timeout { .. })
    }
}

fn describe_exit(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("killed by signal {sig}"),
        (None, None) => "no exit status".to_string(),
    }
}

/// Result of one verification build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failure(BuildError),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success)
    }

    pub fn error(&self) -> Option<&BuildError> {
        match self {
            BuildOutcome::Success => None,
            BuildOutcome::Failure(err) => Some(err),
        }
    }
}

/// Combine already-tailed stdout and stderr into one diagnostic block.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
        if text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("--- {label} ---\n"));
        out.push_str(text);
    }
    out
}
