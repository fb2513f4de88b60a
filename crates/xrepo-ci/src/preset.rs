//! Build command definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xrepo_core::VerifierConfig;

/// Common cargo invocations used as verification builds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildPreset {
    /// cargo check --workspace --all-targets
    CargoCheck,

    /// cargo build --workspace
    CargoBuild,

    /// cargo test --workspace
    CargoTest,
}

impl BuildPreset {
    pub fn name(&self) -> &'static str {
        match self {
            BuildPreset::CargoCheck => "cargo_check",
            BuildPreset::CargoBuild => "cargo_build",
            BuildPreset::CargoTest => "cargo_test",
        }
    }

    pub fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            BuildPreset::CargoCheck => &["cargo", "check", "--workspace", "--all-targets"],
            BuildPreset::CargoBuild => &["cargo", "build", "--workspace"],
            BuildPreset::CargoTest => &["cargo", "test", "--workspace"],
        };
        args.iter().map(|a| a.to_string()).collect()
    }

    /// Default time budget; compiling an upstream from a fresh branch is slow.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            BuildPreset::CargoCheck => 30 * 60,
            BuildPreset::CargoBuild => 45 * 60,
            BuildPreset::CargoTest => 60 * 60,
        }
    }
}

impl fmt::Display for BuildPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "check" | "cargo_check" => Ok(BuildPreset::CargoCheck),
            "build" | "cargo_build" => Ok(BuildPreset::CargoBuild),
            "test" | "cargo_test" => Ok(BuildPreset::CargoTest),
            other => Err(format!("unknown build preset: {other}")),
        }
    }
}

/// A build command and its time budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildCommand {
    /// Human-readable name used in logs and reports.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Time budget in seconds.
    pub timeout_secs: u64,
}

impl BuildCommand {
    pub fn from_preset(preset: BuildPreset) -> Self {
        Self {
            name: preset.name().to_string(),
            command: preset.command(),
            timeout_secs: preset.default_timeout_secs(),
        }
    }

    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
        }
    }

    /// The command configured in `config`.
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self::custom(
            config.build_command.join(" "),
            config.build_command.clone(),
            config.timeout_secs,
        )
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}
