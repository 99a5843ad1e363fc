//! Tracing subscriber setup.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "email-agent.log";

/// Stdout always; a daily-rolling file too when `log_dir` is set.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let file_layer = config.log_dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {e}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}
