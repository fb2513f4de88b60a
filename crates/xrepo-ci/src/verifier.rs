//! Build verification: one build, one classified outcome.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::builder::Builder;
use crate::outcome::BuildOutcome;

/// Outcome plus wall-clock time of a verification build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub outcome: BuildOutcome,
    pub duration_ms: u64,
}

/// Runs the configured build exactly once against a patched workspace.
#[derive(Clone)]
pub struct BuildVerifier {
    builder: Arc<dyn Builder>,
}

impl BuildVerifier {
    pub fn new(builder: Arc<dyn Builder>) -> Self {
        Self { builder }
    }

    pub fn builder_name(&self) -> &str {
        self.builder.name()
    }

    /// Run the build and classify the result. Failures are never retried.
    pub async fn verify(&self, workspace: &Path) -> BuildOutcome {
        self.verify_timed(workspace).await.outcome
    }

    /// Like [`verify`](Self::verify), also reporting how long the build took.
    pub async fn verify_timed(&self, workspace: &Path) -> Verification {
        let start = Instant::now();
        info!(
            builder = self.builder.name(),
            workspace = %workspace.display(),
            "Verifying workspace build"
        );

        let outcome = self.builder.run(workspace).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            BuildOutcome::Success => {
                info!(builder = self.builder.name(), duration_ms, "Build verified");
            }
            BuildOutcome::Failure(err) => {
                error!(
                    builder = self.builder.name(),
                    duration_ms,
                    error = %err,
                    "Build verification failed"
                );
            }
        }

        Verification {
            outcome,
            duration_ms,
        }
    }
}

impl std::fmt::Debug for BuildVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildVerifier")
            .field("builder", &self.builder.name())
            .finish()
    }
}
