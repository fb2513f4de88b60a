//! xrepo - cross-repository integration verifier
//!
//! Builds a downstream workspace against the upstream branch or fork that
//! triggered the run.
//!
//! ## Commands
//!
//! - `resolve`: print the override target for the current trigger
//! - `patch`: rewrite the dependency declaration (or preview with `--check`)
//! - `run`: resolve, patch and build, exiting with the build verdict
//!
//! Exit codes: 0 success, 1 build failure, 2 config/resolve/patch error,
//! 124 build timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

use xrepo_ci::{BuildCommand, BuildPreset, StageError, VerificationRun};
use xrepo_core::{OverrideTarget, TriggerEvent, TriggerMetadata, VerifierConfig};

/// Exit code for config, resolve and patch errors.
const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "xrepo")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-repository integration verifier", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,

    /// Config file (default: <workspace>/xrepo.toml if present)
    #[arg(long, global = true, env = "XREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Downstream workspace root
    #[arg(long, global = true, default_value = ".", env = "XREPO_WORKSPACE")]
    workspace: PathBuf,

    #[command(flatten)]
    overrides: ConfigArgs,

    #[command(flatten)]
    trigger: TriggerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the override target for the current trigger
    Resolve {
        /// Print the trigger and target as JSON
        #[arg(long)]
        json: bool,
    },

    /// Point the dependency at the override target
    Patch {
        /// Show the change without writing the manifest
        #[arg(long)]
        check: bool,
    },

    /// Resolve, patch and build
    Run {
        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

/// Config values that override the config file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Canonical upstream repository URL
    #[arg(long, global = true, env = "XREPO_CANONICAL_REPOSITORY")]
    canonical_repository: Option<String>,

    /// Dependency to override
    #[arg(long, global = true, env = "XREPO_DEPENDENCY")]
    dependency: Option<String>,

    /// Only match the dependency in this table (e.g. workspace.dependencies)
    #[arg(long, global = true, env = "XREPO_TABLE")]
    table: Option<String>,

    /// Manifest path, relative to the workspace
    #[arg(long, global = true, env = "XREPO_MANIFEST_PATH")]
    manifest_path: Option<PathBuf>,

    /// Build preset: check, build or test
    #[arg(long, global = true, env = "XREPO_BUILD_PRESET")]
    preset: Option<BuildPreset>,

    /// Build command, split on whitespace (overrides --preset)
    #[arg(long, global = true, env = "XREPO_BUILD_COMMAND")]
    build_command: Option<String>,

    /// Build time budget in seconds
    #[arg(long, global = true, env = "XREPO_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Output lines kept per stream in failure reports
    #[arg(long, global = true, env = "XREPO_OUTPUT_TAIL_LINES")]
    output_tail_lines: Option<usize>,
}

impl ConfigArgs {
    fn apply(&self, config: &mut VerifierConfig) {
        if let Some(url) = &self.canonical_repository {
            config.canonical_repository = url.clone();
        }
        if let Some(dependency) = &self.dependency {
            config.dependency = dependency.clone();
        }
        if let Some(table) = &self.table {
            config.table = Some(table.clone());
        }
        if let Some(path) = &self.manifest_path {
            config.manifest_path = path.clone();
        }
        if let Some(preset) = self.preset {
            let command = BuildCommand::from_preset(preset);
            config.build_command = command.command;
            config.timeout_secs = command.timeout_secs;
        }
        if let Some(command) = &self.build_command {
            config.build_command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if let Some(lines) = self.output_tail_lines {
            config.output_tail_lines = lines;
        }
    }
}

/// Trigger metadata flags; unset flags fall back to the environment.
#[derive(Args, Debug, Default)]
struct TriggerArgs {
    /// Event name (push, pull_request, workflow_dispatch, ...)
    #[arg(long, global = true)]
    event: Option<String>,

    /// Git ref of a push or dispatch (e.g. refs/heads/main)
    #[arg(long = "ref", global = true)]
    ref_name: Option<String>,

    /// Pull request head branch
    #[arg(long, global = true)]
    head_ref: Option<String>,

    /// Pull request base branch
    #[arg(long, global = true)]
    base_ref: Option<String>,

    /// Repository hosting the pull request head
    #[arg(long, global = true)]
    head_repository_url: Option<String>,

    /// Whether the pull request head is a fork (true/false)
    #[arg(long, global = true)]
    fork: Option<bool>,
}

impl TriggerArgs {
    fn merge(&self, mut metadata: TriggerMetadata) -> TriggerMetadata {
        let pick = |flag: &Option<String>, env: Option<String>| flag.clone().or(env);
        metadata.event_name = pick(&self.event, metadata.event_name);
        metadata.ref_name = pick(&self.ref_name, metadata.ref_name);
        metadata.head_ref = pick(&self.head_ref, metadata.head_ref);
        metadata.base_ref = pick(&self.base_ref, metadata.base_ref);
        metadata.head_repository_url =
            pick(&self.head_repository_url, metadata.head_repository_url);
        metadata.is_fork = self.fork.or(metadata.is_fork);
        metadata
    }
}

#[derive(Serialize)]
struct Resolution<'a> {
    trigger: &'a TriggerEvent,
    target: &'a OverrideTarget,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    xrepo_core::init_tracing(cli.json_logs, level);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_USAGE);
        }
    };
    let metadata = cli.trigger.merge(TriggerMetadata::from_env());
    debug!(?metadata, "Trigger metadata");

    let run = VerificationRun::new(config, &cli.workspace);
    let code = match &cli.command {
        Commands::Resolve { json } => cmd_resolve(&run, &metadata, *json)?,
        Commands::Patch { check } => cmd_patch(&run, &metadata, *check)?,
        Commands::Run { report } => cmd_run(&run, &metadata, report.as_deref()).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<VerifierConfig> {
    let mut config = VerifierConfig::discover(cli.config.as_deref(), &cli.workspace)
        .context("Failed to load config")?;
    cli.overrides.apply(&mut config);
    Ok(config)
}

fn report_stage_error(err: &StageError) -> i32 {
    eprintln!("error: {err}");
    EXIT_USAGE
}

fn cmd_resolve(run: &VerificationRun, metadata: &TriggerMetadata, json: bool) -> Result<i32> {
    let (trigger, target) = match run.resolve(metadata) {
        Ok(resolved) => resolved,
        Err(e) => return Ok(report_stage_error(&e)),
    };

    if json {
        let out = serde_json::to_string_pretty(&Resolution {
            trigger: &trigger,
            target: &target,
        })?;
        println!("{out}");
    } else {
        println!("Trigger:    {}", trigger.kind());
        println!("Repository: {}", target.repository_url);
        println!("Branch:     {}", target.branch_name);
    }
    Ok(0)
}

fn cmd_patch(run: &VerificationRun, metadata: &TriggerMetadata, check: bool) -> Result<i32> {
    let prepared = match run.prepare(metadata) {
        Ok(prepared) => prepared,
        Err(e) => return Ok(report_stage_error(&e)),
    };

    let location = format!(
        "{}:{}",
        prepared.manifest_path.display(),
        prepared.outcome.declaration.line
    );
    println!("Target: {}", prepared.target);

    if check {
        println!("Would patch {location}");
    } else if prepared.changed() {
        if let Err(e) = prepared.apply() {
            return Ok(report_stage_error(&e));
        }
        println!("Patched {location}");
    } else {
        println!("Already up to date: {location}");
    }
    print!("{}", prepared.outcome.summary.render());
    Ok(0)
}

async fn cmd_run(
    run: &VerificationRun,
    metadata: &TriggerMetadata,
    report_path: Option<&Path>,
) -> Result<i32> {
    let builder = Arc::new(run.command_builder());
    let report = run.execute(metadata, builder).await;

    print!("{}", report.render_text());
    if let Some(path) = report_path {
        report.write_json(path)?;
        println!("Report written to {}", path.display());
    }
    Ok(report.exit_code())
}
