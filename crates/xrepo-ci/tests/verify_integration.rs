//! End-to-end checks with real child processes.

use std::sync::Arc;

use xrepo_ci::{
    BuildCommand, BuildError, BuildOutcome, BuildVerifier, CommandBuilder, Stage,
    VerificationRun, EXIT_TIMEOUT,
};
use xrepo_core::{TriggerMetadata, VerifierConfig};

const MANIFEST: &str = r#"[package]
name = "downstream"
version = "0.1.0"

[dependencies]
serde = "1"
upstream = { git = "https://example.com/org/upstream", branch = "main" }
"#;

fn sh(script: &str, timeout_secs: u64) -> Arc<CommandBuilder> {
    Arc::new(CommandBuilder::new(BuildCommand::custom(
        "sh",
        vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        timeout_secs,
    )))
}

fn fork_pr() -> TriggerMetadata {
    TriggerMetadata {
        event_name: Some("pull_request".to_string()),
        head_ref: Some("feature-x".to_string()),
        base_ref: Some("main".to_string()),
        head_repository_url: Some("https://example.com/alice/upstream".to_string()),
        is_fork: Some(true),
        ..TriggerMetadata::default()
    }
}

fn config() -> VerifierConfig {
    VerifierConfig {
        canonical_repository: "https://example.com/org/upstream".to_string(),
        dependency: "upstream".to_string(),
        ..VerifierConfig::default()
    }
}

#[tokio::test]
async fn exit_zero_is_success() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = BuildVerifier::new(sh("exit 0", 30));
    assert_eq!(verifier.verify(dir.path()).await, BuildOutcome::Success);
}

#[tokio::test]
async fn exit_one_is_failure_with_output() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = BuildVerifier::new(sh("echo 'could not compile `downstream`' >&2; exit 1", 30));
    match verifier.verify(dir.path()).await {
        BuildOutcome::Failure(BuildError::Failure {
            exit_code, output, ..
        }) => {
            assert_eq!(exit_code, Some(1));
            assert!(output.contains("could not compile"));
        }
        other => panic!("expected build failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn killed_by_signal_is_failure_with_signal() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = BuildVerifier::new(sh("echo hi; kill -9 $$", 30));
    match verifier.verify(dir.path()).await {
        BuildOutcome::Failure(BuildError::Failure {
            exit_code,
            signal,
            output,
        }) => {
            assert_eq!(exit_code, None);
            assert_eq!(signal, Some(9));
            assert!(output.contains("hi"));
        }
        other => panic!("expected signal failure, got {other:?}"),
    }
}

#[tokio::test]
async fn hang_beyond_budget_is_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let builder = Arc::new(CommandBuilder::new(BuildCommand::custom(
        "sleep",
        vec!["sleep".to_string(), "30".to_string()],
        1,
    )));
    let outcome = BuildVerifier::new(builder).verify(dir.path()).await;
    assert!(matches!(
        outcome,
        BuildOutcome::Failure(BuildError::Timeout { limit_secs: 1, .. })
    ));
}

#[tokio::test]
async fn build_sees_patched_manifest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();

    // The "build" fails unless the manifest points at the fork branch.
    let builder = sh(
        "grep -q 'git = \"https://example.com/alice/upstream\", branch = \"feature-x\"' Cargo.toml",
        30,
    );
    let report = VerificationRun::new(config(), dir.path())
        .execute(&fork_pr(), builder)
        .await;

    assert!(report.passed(), "{}", report.render_text());
    assert_eq!(report.exit_code(), 0);
    let target = report.target.as_ref().unwrap();
    assert_eq!(target.repository_url, "https://example.com/alice/upstream");
    assert_eq!(target.branch_name, "feature-x");

    let written = std::fs::read_to_string(dir.path().join("Cargo.toml")).unwrap();
    assert!(written.contains("serde = \"1\"\n"));
    assert!(written.starts_with("[package]\nname = \"downstream\"\n"));
}

#[tokio::test]
async fn timeout_maps_to_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();

    let mut config = config();
    config.build_command = vec!["sleep".to_string(), "30".to_string()];
    config.timeout_secs = 1;
    let run = VerificationRun::new(config, dir.path());
    let builder = Arc::new(run.command_builder());

    let report = run.execute(&fork_pr(), builder).await;
    assert_eq!(report.verdict.stage(), Some(Stage::Build));
    assert_eq!(report.exit_code(), EXIT_TIMEOUT);
}

#[tokio::test]
async fn configured_command_runs_in_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();

    let mut config = config();
    config.build_command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
    let run = VerificationRun::new(config, dir.path());
    let builder = Arc::new(run.command_builder());

    let report = run.execute(&fork_pr(), builder).await;
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.builder.as_deref(), Some("sh -c exit 3"));
}
