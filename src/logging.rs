//! Tracing setup for the `policy-qa` binary.
//!
//! Events go to stderr in compact form, leaving stdout to the JSON a command prints. A copy
//! without ANSI colours is appended to `POLICY_QA_LOG_FILE`, or `logs/policy-qa.log` when the
//! variable is unset.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "policy-qa.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` filters (default `info`); repeat calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    let file_layer = file_writer(&log_file_path()).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn log_file_path() -> PathBuf {
    std::env::var("POLICY_QA_LOG_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE))
}

/// Non-blocking appender for `path`; `None` when its directory cannot be created.
fn file_writer(path: &Path) -> Option<NonBlocking> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name()?;
    if let Err(err) = std::fs::create_dir_all(directory) {
        eprintln!("Failed to create log directory {}: {err}", directory.display());
        return None;
    }

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // First guard wins; later writers belong to subscribers that fail to install.
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}
