//! xrepo core library
//!
//! Decides which upstream branch/fork a one-off integration build should use
//! and rewrites the downstream manifest to point at it:
//! - [`trigger`]: trigger classification and the context resolver
//! - [`manifest`]: structured lookup and rewrite of one dependency declaration
//! - [`config`]: verifier configuration

pub mod config;
pub mod error;
pub mod git;
pub mod manifest;
pub mod telemetry;
pub mod trigger;

pub use config::VerifierConfig;
pub use error::{ContextError, PatchError, Result, XrepoError};
pub use git::{try_workspace_revision, workspace_revision, WorkspaceRevision};
pub use manifest::{
    patch, Declaration, DeclarationForm, ManifestDocument, ManifestPatcher, PatchOutcome,
    PatchSummary,
};
pub use telemetry::{init_tracing, ENV_LOG};
pub use trigger::{
    branch_from_ref, ContextResolver, OverrideTarget, RepositoryUrl, TriggerEvent, TriggerKind,
    TriggerMetadata,
};

/// xrepo version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
