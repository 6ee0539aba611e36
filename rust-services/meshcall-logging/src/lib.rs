//! Structured logging setup for meshcall services

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logger initialisation failure
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global logger is already installed")]
    AlreadyInitialized,
}

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines (for production)
    Json,
    /// Human-readable output (for development)
    Console,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Console
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn build_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| LoggingError::InvalidFilter {
            filter: default_level.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Install the global subscriber.
///
/// Returns `AlreadyInitialized` instead of panicking when a subscriber is
/// already set, so embedding applications and test binaries can call it
/// unconditionally.
pub fn try_init(service_name: &str, default_level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter = build_filter(default_level)?;

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Console => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_file(true).with_line_number(true))
            .try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!(service = service_name, format = ?format, "Logging initialized");
    Ok(())
}

/// Initialize JSON logging, ignoring an already-installed subscriber
pub fn init_logging(service_name: &str, default_level: &str) {
    if let Err(e) = try_init(service_name, default_level, LogFormat::Json) {
        eprintln!("meshcall-logging: {}", e);
    }
}

/// Initialize console logging, ignoring an already-installed subscriber
pub fn init_console_logging(service_name: &str, default_level: &str) {
    if let Err(e) = try_init(service_name, default_level, LogFormat::Console) {
        eprintln!("meshcall-logging: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flag() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Console);
    }

    #[test]
    fn test_second_init_reports_already_initialized() {
        let first = try_init("test", "debug", LogFormat::Console);
        let second = try_init("test", "debug", LogFormat::Console);
        assert!(first.is_ok() || matches!(first, Err(LoggingError::AlreadyInitialized)));
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized)));
    }
}
