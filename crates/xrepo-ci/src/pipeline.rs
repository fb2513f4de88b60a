//! Verification run orchestration.
//!
//! resolve → load manifest → patch → persist → build, strictly in order. The
//! first failure stops the run and is recorded in the [`RunReport`] together
//! with the stage that produced it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use xrepo_core::{
    try_workspace_revision, ManifestDocument, OverrideTarget, PatchOutcome, TriggerEvent,
    TriggerMetadata, VerifierConfig, XrepoError,
};

use crate::builder::{Builder, CommandBuilder};
use crate::preset::BuildCommand;
use crate::report::{RunReport, Stage};
use crate::verifier::BuildVerifier;

/// A failure in one pipeline stage.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: XrepoError,
}

impl StageError {
    fn new(stage: Stage, source: impl Into<XrepoError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// A resolved and patched manifest that has not been written yet.
#[derive(Debug, Clone)]
pub struct PreparedPatch {
    pub trigger: TriggerEvent,
    pub target: OverrideTarget,
    pub manifest_path: PathBuf,
    pub original: ManifestDocument,
    pub outcome: PatchOutcome,
}

impl PreparedPatch {
    /// Whether the patched manifest differs from the original.
    pub fn changed(&self) -> bool {
        !self.outcome.summary.is_empty()
    }

    /// Write the patched manifest in place.
    pub fn apply(&self) -> Result<(), StageError> {
        self.outcome
            .document
            .persist(&self.manifest_path)
            .map_err(|e| StageError::new(Stage::Patch, e))
    }
}

/// One verification run over a downstream workspace.
#[derive(Debug, Clone)]
pub struct VerificationRun {
    config: VerifierConfig,
    workspace: PathBuf,
}

impl VerificationRun {
    pub fn new(config: VerifierConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Builder for the configured build command.
    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new(BuildCommand::from_config(&self.config))
            .with_tail_lines(self.config.output_tail_lines)
    }

    /// Validate the config and resolve the override target.
    pub fn resolve(
        &self,
        metadata: &TriggerMetadata,
    ) -> Result<(TriggerEvent, OverrideTarget), StageError> {
        self.config
            .validate()
            .map_err(|e| StageError::new(Stage::Config, e))?;
        let resolver = self
            .config
            .resolver()
            .map_err(|e| StageError::new(Stage::Config, e))?;
        let (trigger, target) = resolver
            .resolve_metadata(metadata)
            .map_err(|e| StageError::new(Stage::Resolve, e))?;
        info!(trigger = %trigger.kind(), target = %target, "Resolved override target");
        Ok((trigger, target))
    }

    /// Resolve and patch in memory without touching the workspace.
    pub fn prepare(&self, metadata: &TriggerMetadata) -> Result<PreparedPatch, StageError> {
        let (trigger, target) = self.resolve(metadata)?;
        let (manifest_path, original) = self.load_manifest()?;
        let outcome = self.patch_manifest(&original, &target)?;
        Ok(PreparedPatch {
            trigger,
            target,
            manifest_path,
            original,
            outcome,
        })
    }

    /// Run the whole pipeline and report how it went.
    pub async fn execute(
        &self,
        metadata: &TriggerMetadata,
        builder: Arc<dyn Builder>,
    ) -> RunReport {
        let mut report = RunReport::begin(&self.workspace, self.config.dependency.trim());
        report.workspace_revision = try_workspace_revision(&self.workspace);
        info!(
            run_id = %report.run_id,
            dependency = %report.dependency,
            workspace = %self.workspace.display(),
            "Starting verification run"
        );

        if let Err(e) = self.execute_stages(metadata, builder, &mut report).await {
            warn!(stage = %e.stage, error = %e.source, "Verification run aborted");
            report.abort(e.stage, &e.source);
        }

        info!(
            run_id = %report.run_id,
            passed = report.passed(),
            exit_code = report.exit_code(),
            "Verification run finished"
        );
        report
    }

    async fn execute_stages(
        &self,
        metadata: &TriggerMetadata,
        builder: Arc<dyn Builder>,
        report: &mut RunReport,
    ) -> Result<(), StageError> {
        let (trigger, target) = self.resolve(metadata)?;
        report.trigger = Some(trigger);
        report.target = Some(target.clone());

        let (manifest_path, original) = self.load_manifest()?;
        report.manifest_path = Some(manifest_path.clone());
        report.manifest_digest_before = Some(original.digest());

        let outcome = self.patch_manifest(&original, &target)?;
        report.declaration_line = Some(outcome.declaration.line);
        report.patch = Some(outcome.summary.clone());

        outcome
            .document
            .persist(&manifest_path)
            .map_err(|e| StageError::new(Stage::Patch, e))?;
        report.manifest_digest_after = Some(outcome.document.digest());

        let verifier = BuildVerifier::new(builder);
        report.builder = Some(verifier.builder_name().to_string());
        let verification = verifier.verify_timed(&self.workspace).await;
        report.build_duration_ms = Some(verification.duration_ms);
        report.finish_build(verification.outcome);
        Ok(())
    }

    fn load_manifest(&self) -> Result<(PathBuf, ManifestDocument), StageError> {
        let path = self.config.manifest_in(&self.workspace);
        let document = ManifestDocument::load(&path).map_err(|e| {
            StageError::new(
                Stage::Patch,
                XrepoError::Config(format!("cannot read manifest {}: {e}", path.display())),
            )
        })?;
        Ok((path, document))
    }

    fn patch_manifest(
        &self,
        document: &ManifestDocument,
        target: &OverrideTarget,
    ) -> Result<PatchOutcome, StageError> {
        self.config
            .patcher()
            .patch(document, target)
            .map_err(|e| StageError::new(Stage::Patch, e))
    }
}
