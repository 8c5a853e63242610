//! Tracing setup for the CLI and for plugin mode.
//!
//! The CLI logs to stderr and to a daily rolling file under
//! `<storage>/logs`. A plugin logs to stderr only: stdout carries the
//! address handshake, and the host forwards stderr into its own log.

use machine_shared::constants::store::LOGS_DIR;
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE: &str = "docker-machine.log";

/// Keeps the file writer flushing until dropped. Hold it in `main`.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber for CLI use.
///
/// Falls back to stderr only when the log directory cannot be created.
pub fn init_logging(storage_path: &Path, debug: bool) -> LogGuard {
    let logs_dir = storage_path.join(LOGS_DIR);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        tracing_subscriber::registry()
            .with(env_filter(debug))
            .with(stderr_layer)
            .init();
        tracing::warn!(dir = %logs_dir.display(), error = %e, "File logging disabled");
        return LogGuard { _file_guard: None };
    }

    let file_appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: Some(guard),
    }
}

/// Install the global subscriber for plugin mode.
pub fn init_plugin_logging() {
    tracing_subscriber::registry()
        .with(env_filter(false))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .without_time(),
        )
        .init();
}
