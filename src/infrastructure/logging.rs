use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::config::LoggingConfig;
use crate::domain::PracticeError;

/// Crate target used in log filter directives.
const LOG_TARGET: &str = "speech_practice";

const LOG_FILE: &str = "speech-practice.log";

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Filter directive for the configured level. Other crates log at `warn`.
fn filter_directive(level: &str) -> Result<String, PracticeError> {
    let level = level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(PracticeError::Config(format!("Unknown log level: {level}")));
    }
    Ok(format!("{LOG_TARGET}={level},warn"))
}

/// Install the global subscriber: a console layer, plus a daily-rotating
/// JSON file layer when file logging is enabled.
///
/// `RUST_LOG` overrides the console filter. The returned guard flushes the
/// file writer on drop and must be kept alive. Calling this again after a
/// subscriber is installed is harmless.
pub fn init_logging(
    logs_dir: &Path,
    config: &LoggingConfig,
) -> Result<Option<WorkerGuard>, PracticeError> {
    let directive = filter_directive(&config.level)?;

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(console_filter);

    let (file_layer, guard) = if config.file_logging {
        fs::create_dir_all(logs_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(EnvFilter::new(&directive));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(
            logs_dir = ?logs_dir,
            level = %config.level,
            file_logging = config.file_logging,
            "Logging initialized"
        );
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("debug").unwrap(), "speech_practice=debug,warn");
        assert_eq!(filter_directive(" WARN ").unwrap(), "speech_practice=warn,warn");
        assert!(matches!(filter_directive("loud"), Err(PracticeError::Config(_))));
    }

    #[test]
    fn test_console_logging_is_reentrant() {
        let logs_dir = std::env::temp_dir().join("speech_practice_log_test");
        let config = LoggingConfig {
            level: "debug".to_string(),
            file_logging: false,
        };
        assert!(init_logging(&logs_dir, &config).unwrap().is_none());
        assert!(init_logging(&logs_dir, &config).unwrap().is_none());
    }
}
