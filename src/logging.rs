//! Structured logging bootstrap.
//!
//! Console output for humans plus a JSON file under `log/` for post-hoc
//! debugging of the async claim/execute pipeline. Initialization is guarded
//! so binaries and tests can call it freely.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

static LOGGER: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize tracing with environment-specific configuration.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let environment = current_environment();
        let log_level = default_log_level(&environment);
        let console_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.clone()));

        let log_dir = PathBuf::from("log");
        if fs::create_dir_all(&log_dir).is_err() {
            // No writable log directory; console output still works.
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_filter(console_filter))
                .try_init();
            return None;
        }

        let log_filename = format!(
            "{}.{}.{}.log",
            environment,
            process::id(),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_filter(console_filter))
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            );

        if subscriber.try_init().is_err() {
            // A global subscriber is already installed (common under test
            // harnesses); keep using it.
            return None;
        }

        tracing::info!(
            environment = %environment,
            log_file = %log_dir.join(log_filename).display(),
            "logging initialized"
        );

        Some(guard)
    });
}

fn current_environment() -> String {
    std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_defaults_per_environment() {
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("test"), "debug");
    }
}
