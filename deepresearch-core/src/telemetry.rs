//! Tracing subscriber setup.
//!
//! Installs a human-readable stderr layer and, optionally, a JSON layer that
//! writes daily-rotated files through a non-blocking appender. Embedders that
//! manage their own subscriber can skip this entirely; the engine only emits
//! `tracing` events.

use crate::config::TelemetryConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors from subscriber installation.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to create log directory: {0}")]
    LogDir(#[from] std::io::Error),

    #[error("A global tracing subscriber is already installed: {message}")]
    AlreadyInstalled { message: String },
}

/// Install the global subscriber described by `config`.
///
/// The returned guard flushes the JSON writer on drop and must be kept alive
/// for as long as logging is needed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let stderr_filter =
        EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: config.filter.clone(),
            message: e.to_string(),
        })?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let (json_layer, guard) = match &config.json_log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "deepresearch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled {
            message: e.to_string(),
        })?;

    Ok(guard)
}
