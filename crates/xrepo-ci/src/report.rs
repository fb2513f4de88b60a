//! Run report: the serialisable record of one verification run.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xrepo_core::{OverrideTarget, PatchSummary, TriggerEvent, WorkspaceRevision};

use crate::outcome::{BuildError, BuildOutcome};

/// Process exit code for a run whose build timed out (matches coreutils `timeout`).
pub const EXIT_TIMEOUT: i32 = 124;

/// Pipeline stage that decided a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Resolve,
    Patch,
    Build,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Resolve => "resolve",
            Stage::Patch => "patch",
            Stage::Build => "build",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    /// The run has not finished.
    Pending,

    /// The patched workspace built.
    Passed,

    /// A stage before the build failed; nothing was built.
    Aborted { stage: Stage, error: String },

    /// The build ran and did not succeed.
    BuildFailed { error: BuildError },
}

impl Verdict {
    /// Stage that decided the run, if it did not pass.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Verdict::Pending | Verdict::Passed => None,
            Verdict::Aborted { stage, .. } => Some(*stage),
            Verdict::BuildFailed { .. } => Some(Stage::Build),
        }
    }
}

/// Record of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Downstream workspace root.
    pub workspace: PathBuf,

    /// Workspace commit before patching, when the workspace is a git checkout.
    pub workspace_revision: Option<WorkspaceRevision>,

    /// Dependency being overridden.
    pub dependency: String,

    pub trigger: Option<TriggerEvent>,
    pub target: Option<OverrideTarget>,

    pub manifest_path: Option<PathBuf>,

    /// SHA-256 of the manifest before patching.
    pub manifest_digest_before: Option<String>,

    /// SHA-256 of the manifest as written for the build.
    pub manifest_digest_after: Option<String>,

    /// 1-based line of the rewritten declaration.
    pub declaration_line: Option<usize>,

    pub patch: Option<PatchSummary>,

    /// Builder name, set once the build starts.
    pub builder: Option<String>,
    pub build_duration_ms: Option<u64>,

    pub verdict: Verdict,
}

impl RunReport {
    /// Start a report for a new run.
    pub fn begin(workspace: impl Into<PathBuf>, dependency: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            workspace: workspace.into(),
            workspace_revision: None,
            dependency: dependency.into(),
            trigger: None,
            target: None,
            manifest_path: None,
            manifest_digest_before: None,
            manifest_digest_after: None,
            declaration_line: None,
            patch: None,
            builder: None,
            build_duration_ms: None,
            verdict: Verdict::Pending,
        }
    }

    /// Record a failure before the build stage.
    pub fn abort(&mut self, stage: Stage, error: impl fmt::Display) {
        self.finish(Verdict::Aborted {
            stage,
            error: error.to_string(),
        });
    }

    /// Record the build outcome.
    pub fn finish_build(&mut self, outcome: BuildOutcome) {
        let verdict = match outcome {
            BuildOutcome::Success => Verdict::Passed,
            BuildOutcome::Failure(error) => Verdict::BuildFailed { error },
        };
        self.finish(verdict);
    }

    fn finish(&mut self, verdict: Verdict) {
        self.verdict = verdict;
        self.finished_at = Some(Utc::now());
    }

    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Passed)
    }

    /// Process exit code: 0 passed, 1 build failure, 2 resolve/patch/config
    /// error, 124 build timeout.
    pub fn exit_code(&self) -> i32 {
        match &self.verdict {
            Verdict::Passed => 0,
            Verdict::BuildFailed {
                error: BuildError::Timeout { .. },
            } => EXIT_TIMEOUT,
            Verdict::BuildFailed { .. } => 1,
            Verdict::Aborted { .. } | Verdict::Pending => 2,
        }
    }

    /// Human-readable summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let status = match &self.verdict {
            Verdict::Pending => "PENDING".to_string(),
            Verdict::Passed => "PASSED".to_string(),
            other => format!(
                "FAILED at {} stage",
                other.stage().map_or("unknown", |s| s.as_str())
            ),
        };
        let _ = writeln!(out, "xrepo run {}: {status}", self.run_id);
        let _ = writeln!(out, "  workspace:  {}", self.workspace.display());
        if let Some(revision) = &self.workspace_revision {
            let _ = writeln!(out, "  commit:     {revision}");
        }
        if let Some(trigger) = &self.trigger {
            let _ = writeln!(out, "  trigger:    {}", trigger.kind());
        }
        if let Some(target) = &self.target {
            let _ = writeln!(out, "  target:     {target}");
        }
        match (&self.manifest_path, self.declaration_line) {
            (Some(path), Some(line)) => {
                let _ = writeln!(
                    out,
                    "  dependency: {} ({}:{line})",
                    self.dependency,
                    path.display()
                );
            }
            _ => {
                let _ = writeln!(out, "  dependency: {}", self.dependency);
            }
        }
        if let Some(patch) = &self.patch {
            let _ = writeln!(out, "  patch:");
            for line in patch.render().lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        if let Some(builder) = &self.builder {
            match self.build_duration_ms {
                Some(ms) => {
                    let _ = writeln!(out, "  build:      {builder} ({ms} ms)");
                }
                None => {
                    let _ = writeln!(out, "  build:      {builder}");
                }
            }
        }

        match &self.verdict {
            Verdict::Aborted { error, .. } => {
                let _ = writeln!(out, "  error:      {error}");
            }
            Verdict::BuildFailed { error } => {
                let _ = writeln!(out, "  error:      {error}");
                if let Some(output) = error.output() {
                    let _ = writeln!(out, "--- build output (tail) ---");
                    let _ = writeln!(out, "{output}");
                }
            }
            Verdict::Pending | Verdict::Passed => {}
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json().context("serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("write run report to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport::begin("/work/downstream", "upstream")
    }

    #[test]
    fn test_pending_until_finished() {
        let report = report();
        assert_eq!(report.verdict, Verdict::Pending);
        assert!(report.finished_at.is_none());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        let mut passed = report();
        passed.finish_build(BuildOutcome::Success);
        assert_eq!(passed.exit_code(), 0);
        assert!(passed.passed());

        let mut failed = report();
        failed.finish_build(BuildOutcome::Failure(BuildError::Failure {
            exit_code: Some(101),
            signal: None,
            output: String::new(),
        }));
        assert_eq!(failed.exit_code(), 1);

        let mut spawn = report();
        spawn.finish_build(BuildOutcome::Failure(BuildError::Spawn {
            command: "cargo".to_string(),
            message: "not found".to_string(),
        }));
        assert_eq!(spawn.exit_code(), 1);

        let mut timed_out = report();
        timed_out.finish_build(BuildOutcome::Failure(BuildError::Timeout {
            limit_secs: 1,
            output: String::new(),
        }));
        assert_eq!(timed_out.exit_code(), EXIT_TIMEOUT);

        let mut aborted = report();
        aborted.abort(Stage::Patch, "dependency `upstream` is not declared");
        assert_eq!(aborted.exit_code(), 2);
        assert_eq!(aborted.verdict.stage(), Some(Stage::Patch));
        assert!(aborted.builder.is_none());
    }

    #[test]
    fn test_render_failure_includes_output() {
        let mut report = report();
        report.builder = Some("cargo check --workspace".to_string());
        report.build_duration_ms = Some(1200);
        report.finish_build(BuildOutcome::Failure(BuildError::Failure {
            exit_code: Some(101),
            signal: None,
            output: "--- stderr ---\nerror[E0425]: cannot find value".to_string(),
        }));

        let text = report.render_text();
        assert!(text.contains("FAILED at build stage"));
        assert!(text.contains("(1200 ms)"));
        assert!(text.contains("build failed (exit code 101)"));
        assert!(text.contains("error[E0425]"));
    }

    #[test]
    fn test_render_patch_hunk() {
        let mut report = report();
        report.manifest_path = Some(PathBuf::from("Cargo.toml"));
        report.declaration_line = Some(9);
        report.patch = Some(PatchSummary {
            first_line: 9,
            removed: vec!["a".to_string()],
            added: vec!["b".to_string()],
        });
        report.finish_build(BuildOutcome::Success);

        let text = report.render_text();
        assert!(text.contains(": PASSED"));
        assert!(text.contains("upstream (Cargo.toml:9)"));
        assert!(text.contains("    @@ line 9 @@"));
        assert!(text.contains("    +b"));
    }

    #[test]
    fn test_json_shape() {
        let mut report = report();
        report.abort(Stage::Resolve, "unknown trigger");
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["verdict"]["status"], "aborted");
        assert_eq!(value["verdict"]["stage"], "resolve");
        assert_eq!(value["dependency"], "upstream");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = report();
        report.finish_build(BuildOutcome::Success);
        report.write_json(&path).unwrap();

        let loaded: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert!(loaded.passed());
    }
}
