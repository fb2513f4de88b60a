//! Verifier configuration.
//!
//! Loaded from an optional `xrepo.toml`; the CLI layers flag and `XREPO_*`
//! environment overrides on top before calling [`VerifierConfig::validate`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, XrepoError};
use crate::manifest::ManifestPatcher;
use crate::trigger::{ContextResolver, RepositoryUrl};

/// Default config file name, looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "xrepo.toml";

/// Default build budget: 30 minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

/// Default number of output lines kept for failure reports.
pub const DEFAULT_OUTPUT_TAIL_LINES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// URL of the canonical upstream repository.
    pub canonical_repository: String,

    /// Name of the dependency declaration to rewrite.
    pub dependency: String,

    /// Restrict matching to one dependency table, e.g. `workspace.dependencies`.
    pub table: Option<String>,

    /// Manifest path, relative to the workspace root unless absolute.
    pub manifest_path: PathBuf,

    /// Build command (first element is the executable).
    pub build_command: Vec<String>,

    /// Build time budget in seconds.
    pub timeout_secs: u64,

    /// Output lines kept in failure details.
    pub output_tail_lines: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            canonical_repository: String::new(),
            dependency: String::new(),
            table: None,
            manifest_path: PathBuf::from("Cargo.toml"),
            build_command: vec![
                "cargo".to_string(),
                "check".to_string(),
                "--workspace".to_string(),
            ],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            output_tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
        }
    }
}

impl VerifierConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| XrepoError::Config(format!("invalid config: {e}")))
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            XrepoError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded verifier config");
        Ok(config)
    }

    /// Load `path` if given, else `<workspace>/xrepo.toml` if it exists, else defaults.
    pub fn discover(path: Option<&Path>, workspace: &Path) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let candidate = workspace.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Check the config is usable for a run.
    pub fn validate(&self) -> Result<()> {
        self.canonical_url()?;
        if self.dependency.trim().is_empty() {
            return Err(XrepoError::Config("dependency name is empty".to_string()));
        }
        if self.build_command.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(XrepoError::Config("build command is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(XrepoError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn canonical_url(&self) -> Result<RepositoryUrl> {
        RepositoryUrl::parse(&self.canonical_repository).map_err(|e| {
            XrepoError::Config(format!("canonical_repository: {e}"))
        })
    }

    pub fn resolver(&self) -> Result<ContextResolver> {
        Ok(ContextResolver::new(self.canonical_url()?))
    }

    pub fn patcher(&self) -> ManifestPatcher {
        let patcher = ManifestPatcher::new(self.dependency.trim());
        match self.table.as_deref().map(str::trim) {
            Some(table) if !table.is_empty() => patcher.in_table(table),
            _ => patcher,
        }
    }

    /// Absolute location of the manifest for `workspace`.
    pub fn manifest_in(&self, workspace: &Path) -> PathBuf {
        if self.manifest_path.is_absolute() {
            self.manifest_path.clone()
        } else {
            workspace.join(&self.manifest_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> VerifierConfig {
        VerifierConfig {
            canonical_repository: "https://example.com/org/upstream".to_string(),
            dependency: "upstream".to_string(),
            ..VerifierConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.manifest_path, PathBuf::from("Cargo.toml"));
        assert_eq!(config.timeout_secs, 1800);
        assert_eq!(config.build_command[0], "cargo");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = VerifierConfig::from_toml_str(
            r#"
canonical_repository = "https://example.com/org/upstream"
dependency = "upstream"
table = "workspace.dependencies"
build_command = ["cargo", "test", "--workspace"]
timeout_secs = 600
"#,
        )
        .unwrap();
        assert_eq!(config.table.as_deref(), Some("workspace.dependencies"));
        assert_eq!(config.timeout_secs, 600);
        assert_eq!(config.output_tail_lines, DEFAULT_OUTPUT_TAIL_LINES);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = VerifierConfig::from_toml_str("retries = 3\n").unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.canonical_repository = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dependency = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.build_command.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discover_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VerifierConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config, VerifierConfig::default());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "dependency = \"upstream\"\n",
        )
        .unwrap();
        let config = VerifierConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config.dependency, "upstream");
    }

    #[test]
    fn test_manifest_in_workspace() {
        let config = valid();
        assert_eq!(
            config.manifest_in(Path::new("/work")),
            PathBuf::from("/work/Cargo.toml")
        );
    }
}
