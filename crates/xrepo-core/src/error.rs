//! Error taxonomy for the resolve and patch stages.

/// Trigger metadata was insufficient or ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("cannot determine trigger kind from event name {0:?}")]
    UnknownEventKind(Option<String>),

    #[error("{kind} trigger is missing required field: {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("ref {0:?} does not name a branch")]
    NotABranch(String),

    #[error("invalid branch name {0:?}")]
    InvalidBranch(String),

    #[error("invalid repository url {0:?}")]
    InvalidRepositoryUrl(String),
}

/// The target declaration was missing, ambiguous or could not be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("dependency `{name}` is not declared in any dependency table")]
    NotFound { name: String },

    #[error("dependency `{name}` is declared {} times (lines {lines:?}); narrow the table to pick one", lines.len())]
    Ambiguous { name: String, lines: Vec<usize> },

    #[error("dependency `{name}` at line {line} has no `git` source to override")]
    NotGitDependency { name: String, line: usize },

    #[error("dependency `{name}` at line {line} uses an unsupported form: {reason}")]
    UnsupportedForm {
        name: String,
        line: usize,
        reason: String,
    },

    #[error("patched manifest failed verification: {0}")]
    Verification(String),
}

/// Errors produced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum XrepoError {
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("config error: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, XrepoError>;
