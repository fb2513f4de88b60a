//! Trigger classification and override target resolution.
//!
//! The CI platform hands us loosely-typed metadata (an event name, a handful
//! of refs and maybe a head repository URL). [`TriggerEvent::classify`] turns
//! that into an explicit variant, and [`ContextResolver::resolve`] maps the
//! variant to the repository/branch pair the manifest should point at.
//!
//! Nothing here falls back to a default branch: missing metadata is an error.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContextError;

/// Environment variable holding the event name.
pub const ENV_EVENT_NAME: &str = "GITHUB_EVENT_NAME";
/// Environment variable holding the ref the run was triggered on.
pub const ENV_REF: &str = "GITHUB_REF";
/// Environment variable holding the pull request head branch.
pub const ENV_HEAD_REF: &str = "GITHUB_HEAD_REF";
/// Environment variable holding the pull request base branch.
pub const ENV_BASE_REF: &str = "GITHUB_BASE_REF";
/// Environment variable holding the clone URL of the pull request head repository.
pub const ENV_HEAD_REPOSITORY_URL: &str = "XREPO_HEAD_REPOSITORY_URL";
/// Environment variable set to `true` when the pull request comes from a fork.
pub const ENV_HEAD_IS_FORK: &str = "XREPO_HEAD_IS_FORK";

/// Raw trigger metadata as supplied by the invoking platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub event_name: Option<String>,
    pub ref_name: Option<String>,
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub head_repository_url: Option<String>,
    pub is_fork: Option<bool>,
}

impl TriggerMetadata {
    /// Read metadata from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read metadata through an arbitrary key lookup.
    ///
    /// Empty values are treated as absent; platforms commonly export
    /// `GITHUB_HEAD_REF=""` for non pull request events.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            event_name: get(ENV_EVENT_NAME),
            ref_name: get(ENV_REF),
            head_ref: get(ENV_HEAD_REF),
            base_ref: get(ENV_BASE_REF),
            head_repository_url: get(ENV_HEAD_REPOSITORY_URL),
            is_fork: get(ENV_HEAD_IS_FORK).and_then(|v| parse_flag(&v)),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Coarse trigger classification, used in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ManualDispatch,
    PullRequestFromFork,
    PushToBranch,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::ManualDispatch => "manual dispatch",
            TriggerKind::PullRequestFromFork => "fork pull request",
            TriggerKind::PushToBranch => "push",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event that started this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Run started by hand on `ref_name`.
    ManualDispatch { ref_name: String },

    /// Pull request whose head branch lives in a fork.
    PullRequestFromFork { head_ref: String, fork_url: String },

    /// Push to a branch of the canonical repository. Same-repository pull
    /// requests are classified here too, with the head branch as `ref_name`.
    PushToBranch { ref_name: String },
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::ManualDispatch { .. } => TriggerKind::ManualDispatch,
            TriggerEvent::PullRequestFromFork { .. } => TriggerKind::PullRequestFromFork,
            TriggerEvent::PushToBranch { .. } => TriggerKind::PushToBranch,
        }
    }

    /// Classify raw metadata into a trigger variant.
    ///
    /// `canonical` is needed to recognise pull requests whose head lives in
    /// the canonical repository itself.
    pub fn classify(
        metadata: &TriggerMetadata,
        canonical: &RepositoryUrl,
    ) -> Result<Self, ContextError> {
        let event = metadata.event_name.as_deref().map(str::trim);

        match event {
            Some("workflow_dispatch" | "repository_dispatch" | "manual") => {
                let ref_name = require(&metadata.ref_name, "manual dispatch", "ref_name")?;
                Ok(TriggerEvent::ManualDispatch { ref_name })
            }
            Some("push") => {
                let ref_name = require(&metadata.ref_name, "push", "ref_name")?;
                Ok(TriggerEvent::PushToBranch { ref_name })
            }
            Some("pull_request" | "pull_request_target") => {
                let head_ref = require(&metadata.head_ref, "pull request", "head_ref")?;

                if metadata.is_fork == Some(false) {
                    debug!(head_ref = %head_ref, "pull request marked as same-repository");
                    return Ok(TriggerEvent::PushToBranch { ref_name: head_ref });
                }

                let Some(head_url) = metadata.head_repository_url.as_deref() else {
                    return Err(ContextError::MissingField {
                        kind: "pull request",
                        field: "head_repository_url",
                    });
                };

                let head_url = RepositoryUrl::parse(head_url)?;
                if head_url.same_repository(canonical) {
                    debug!(head_ref = %head_ref, "pull request head is the canonical repository");
                    Ok(TriggerEvent::PushToBranch { ref_name: head_ref })
                } else {
                    Ok(TriggerEvent::PullRequestFromFork {
                        head_ref,
                        fork_url: head_url.into_string(),
                    })
                }
            }
            other => Err(ContextError::UnknownEventKind(other.map(str::to_string))),
        }
    }
}

fn require(
    value: &Option<String>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, ContextError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ContextError::MissingField { kind, field })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"(?:https?|ssh|git)://(?:[^\s@/]+@)?[A-Za-z0-9][A-Za-z0-9.\-]*(?::\d+)?/\S+",
            r"|file:///\S+",
            r"|[A-Za-z0-9._\-]+@[A-Za-z0-9][A-Za-z0-9.\-]*:[^\s/]\S*",
            r")$"
        ))
        .expect("repository url pattern is valid")
    })
}

/// A well-formed git repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryUrl(String);

impl RepositoryUrl {
    pub fn parse(raw: &str) -> Result<Self, ContextError> {
        let trimmed = raw.trim();
        if url_pattern().is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ContextError::InvalidRepositoryUrl(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether two URLs name the same repository, ignoring scheme and host
    /// case, a trailing slash and a trailing `.git`. Paths compare exactly:
    /// `org/Repo` and `ORG/repo` may be different forks.
    pub fn same_repository(&self, other: &RepositoryUrl) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> String {
        let url = self.0.trim_end_matches('/');
        let url = match url.len().checked_sub(4).and_then(|at| url.get(at..).map(|s| (at, s))) {
            Some((at, suffix)) if suffix.eq_ignore_ascii_case(".git") => &url[..at],
            _ => url,
        };
        let url = url.trim_end_matches('/');

        let path_start = match url.find("://") {
            Some(scheme_end) => {
                let authority = scheme_end + 3;
                url[authority..].find('/').map_or(url.len(), |i| authority + i)
            }
            // scp-style `user@host:path`
            None => url.find(':').unwrap_or(url.len()),
        };
        let (prefix, path) = url.split_at(path_start);
        format!("{}{path}", prefix.to_ascii_lowercase())
    }
}

impl TryFrom<String> for RepositoryUrl {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RepositoryUrl::parse(&value)
    }
}

impl From<RepositoryUrl> for String {
    fn from(url: RepositoryUrl) -> Self {
        url.0
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turn a ref into a branch name, stripping `refs/heads/`.
///
/// Other ref namespaces (tags, pull request merge refs) are rejected.
pub fn branch_from_ref(reference: &str) -> Result<String, ContextError> {
    let reference = reference.trim();
    let branch = match reference.strip_prefix("refs/heads/") {
        Some(rest) => rest,
        None if reference.starts_with("refs/") => {
            return Err(ContextError::NotABranch(reference.to_string()));
        }
        None => reference,
    };

    if !is_valid_branch(branch) {
        return Err(ContextError::InvalidBranch(branch.to_string()));
    }
    Ok(branch.to_string())
}

fn is_valid_branch(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && !name.contains("..")
        && !name.contains("@{")
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
}

/// The repository/branch pair that replaces the dependency's pinned source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideTarget {
    pub repository_url: String,
    pub branch_name: String,
}

impl OverrideTarget {
    /// Build a target, validating both fields.
    pub fn new(repository_url: &str, branch_name: &str) -> Result<Self, ContextError> {
        let url = RepositoryUrl::parse(repository_url)?;
        if !is_valid_branch(branch_name) {
            return Err(ContextError::InvalidBranch(branch_name.to_string()));
        }
        Ok(Self {
            repository_url: url.into_string(),
            branch_name: branch_name.to_string(),
        })
    }
}

impl fmt::Display for OverrideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (branch {})", self.repository_url, self.branch_name)
    }
}

/// Maps trigger events to override targets for one canonical repository.
#[derive(Debug, Clone)]
pub struct ContextResolver {
    canonical: RepositoryUrl,
}

impl ContextResolver {
    pub fn new(canonical: RepositoryUrl) -> Self {
        Self { canonical }
    }

    pub fn canonical(&self) -> &RepositoryUrl {
        &self.canonical
    }

    /// Classify `metadata` and resolve it in one step.
    pub fn resolve_metadata(
        &self,
        metadata: &TriggerMetadata,
    ) -> Result<(TriggerEvent, OverrideTarget), ContextError> {
        let trigger = TriggerEvent::classify(metadata, &self.canonical)?;
        let target = self.resolve(&trigger)?;
        Ok((trigger, target))
    }

    /// Resolve the override target for `trigger`.
    pub fn resolve(&self, trigger: &TriggerEvent) -> Result<OverrideTarget, ContextError> {
        let target = match trigger {
            TriggerEvent::ManualDispatch { ref_name } => OverrideTarget {
                repository_url: self.canonical.as_str().to_string(),
                branch_name: branch_from_ref(ref_name)?,
            },
            TriggerEvent::PushToBranch { ref_name } => OverrideTarget {
                repository_url: self.canonical.as_str().to_string(),
                branch_name: branch_from_ref(ref_name)?,
            },
            TriggerEvent::PullRequestFromFork { head_ref, fork_url } => {
                if fork_url.trim().is_empty() {
                    return Err(ContextError::MissingField {
                        kind: "fork pull request",
                        field: "fork_url",
                    });
                }
                OverrideTarget {
                    repository_url: RepositoryUrl::parse(fork_url)?.into_string(),
                    branch_name: branch_from_ref(head_ref)?,
                }
            }
        };

        debug!(
            kind = %trigger.kind(),
            repository = %target.repository_url,
            branch = %target.branch_name,
            "Resolved override target"
        );
        Ok(target)
    }
}
