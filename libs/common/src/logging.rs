//! Logging bootstrap for VoltageEMS battery services
//!
//! Console output uses the bracketed `timestamp [LEVEL] message` format.
//! When a log directory is configured a daily rolling file layer is added,
//! written through a non-blocking appender.

use std::path::PathBuf;
use std::sync::OnceLock;

use errors::{VoltageError, VoltageResult};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the configured log directory
pub const LOG_DIR_ENV: &str = "VOLTAGE_LOG_DIR";

/// Keeps the file appender flushing until process exit
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2025-12-02T00:50:44.809123Z [INFO] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Service name, used as the log file prefix and the default debug target
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for daily log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// JSON lines in the log file instead of the bracketed format
    #[serde(default)]
    pub enable_json: bool,
    /// ANSI colors on the console
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_service_name() -> String {
    "unknown".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            level: default_level(),
            log_dir: None,
            enable_json: false,
            ansi: default_ansi(),
        }
    }
}

impl LogConfig {
    /// Log directory with priority: `VOLTAGE_LOG_DIR` env > config > none
    pub fn resolved_log_dir(&self) -> Option<PathBuf> {
        match std::env::var(LOG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
            _ => self.log_dir.clone(),
        }
    }

    /// Filter directives; `RUST_LOG` wins over the configured level
    pub fn filter_directives(&self) -> String {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(env) if !env.is_empty() => env,
            _ => self.level.clone(),
        }
    }
}

/// Install the global subscriber
///
/// Fails when a subscriber is already installed or the filter is invalid.
pub fn init_logging(config: &LogConfig) -> VoltageResult<()> {
    let directives = config.filter_directives();
    let filter = EnvFilter::try_new(&directives).map_err(|e| VoltageError::InvalidConfig {
        field: "logging.level".to_string(),
        reason: format!("{}: {}", directives, e),
    })?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let log_dir = config.resolved_log_dir();
    let file_layer = match &log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            if FILE_GUARD.set(guard).is_err() {
                return Err(VoltageError::StartupFailed(
                    "logging already initialized".to_string(),
                ));
            }
            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| VoltageError::StartupFailed(format!("logging: {}", e)))?;

    match log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {}", config.service_name, dir.display()),
        None => tracing::info!("Logging: {} (console only)", config.service_name),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_log_dir_wins_over_config() {
        let config = LogConfig {
            log_dir: Some(PathBuf::from("/var/log/bmsrv")),
            ..Default::default()
        };
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(config.resolved_log_dir(), Some(PathBuf::from("/var/log/bmsrv")));

        std::env::set_var(LOG_DIR_ENV, "/tmp/voltage-logs");
        let resolved = config.resolved_log_dir();
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(resolved, Some(PathBuf::from("/tmp/voltage-logs")));
    }

    #[test]
    #[serial]
    fn test_console_only_by_default() {
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(LogConfig::default().resolved_log_dir(), None);
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_level() {
        let config = LogConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        std::env::remove_var("RUST_LOG");
        assert_eq!(config.filter_directives(), "debug");

        std::env::set_var("RUST_LOG", "warn,bmsrv=trace");
        let directives = config.filter_directives();
        std::env::remove_var("RUST_LOG");
        assert_eq!(directives, "warn,bmsrv=trace");
    }
}
