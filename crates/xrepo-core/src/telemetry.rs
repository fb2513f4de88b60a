//! Log setup for the `xrepo` binary.
//!
//! Verification runs inside CI jobs whose logs already carry the build's own
//! output, so xrepo logs to stderr and has its own filter variable.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives for xrepo alone, checked before `RUST_LOG`.
pub const ENV_LOG: &str = "XREPO_LOG";

/// Install the global subscriber. Only the first call takes effect.
///
/// * `json`: newline-delimited JSON records for log collectors.
/// * `level`: verbosity when neither `XREPO_LOG` nor `RUST_LOG` is set.
///
/// Stdout stays reserved for command output (resolved targets, patch
/// previews, JSON reports).
pub fn init_tracing(json: bool, level: Level) {
    let directives = filter_directives(
        std::env::var(ENV_LOG).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        level,
    );
    let env_filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_ansi(std::io::stderr().is_terminal()))
            .try_init()
            .ok();
    }
}

/// The first non-blank of `xrepo_log` and `rust_log`, else `level`.
fn filter_directives(xrepo_log: Option<String>, rust_log: Option<String>, level: Level) -> String {
    [xrepo_log, rust_log]
        .into_iter()
        .flatten()
        .find(|d| !d.trim().is_empty())
        .unwrap_or_else(|| level.as_str().to_string())
}
