//! xrepo build verification and run pipeline
//!
//! Runs the downstream build against a patched manifest:
//! - [`builder`]: the [`Builder`] capability and the process-backed [`CommandBuilder`]
//! - [`verifier`]: single-shot build verification
//! - [`pipeline`]: resolve → patch → build orchestration
//! - [`report`]: run record, exit codes and rendering

pub mod builder;
mod capture;
pub mod outcome;
pub mod pipeline;
pub mod preset;
pub mod report;
pub mod verifier;

pub use builder::{Builder, CommandBuilder};
pub use outcome::{BuildError, BuildOutcome};
pub use pipeline::{PreparedPatch, StageError, VerificationRun};
pub use preset::{BuildCommand, BuildPreset};
pub use report::{RunReport, Stage, Verdict, EXIT_TIMEOUT};
pub use verifier::{BuildVerifier, Verification};
