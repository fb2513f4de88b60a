//! The downstream commit a verification run starts from.

use std::fmt;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XrepoError};

/// Commit checked out in the workspace, and whether tracked files already
/// differed from it before the manifest was patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRevision {
    pub commit: String,
    pub dirty: bool,
}

impl fmt::Display for WorkspaceRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dirty {
            write!(f, "{} (with local changes)", self.commit)
        } else {
            f.write_str(&self.commit)
        }
    }
}

/// Read the revision of the git checkout at `workspace`.
///
/// Must be called before patching, otherwise the rewritten manifest makes
/// every tree look dirty.
pub fn workspace_revision(workspace: &Path) -> Result<WorkspaceRevision> {
    let commit = git(workspace, &["rev-parse", "--verify", "HEAD"])?;
    if commit.is_empty() {
        return Err(XrepoError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    let status = git(workspace, &["status", "--porcelain", "--untracked-files=no"])?;
    Ok(WorkspaceRevision {
        commit,
        dirty: !status.is_empty(),
    })
}

/// Best-effort variant of [`workspace_revision`] for run reports.
pub fn try_workspace_revision(workspace: &Path) -> Option<WorkspaceRevision> {
    match workspace_revision(workspace) {
        Ok(revision) => Some(revision),
        Err(err) => {
            tracing::debug!(error = %err, "Workspace revision unavailable");
            None
        }
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| XrepoError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(XrepoError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
