//! Tracing subscriber initialization.
//!
//! Format and level come from the service configuration; `RUST_LOG`
//! overrides the configured level when set. With `log_dir` configured,
//! output goes to a daily-rotated file through a non-blocking writer.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Returns the writer guard when file logging is active; the caller must
/// keep it alive for the process lifetime or buffered lines are lost.
/// Safe to call more than once; the first subscriber wins, which keeps
/// tests that initialize logging harmless.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sentinel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let result = if config.format == "pretty" {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
            } else {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .json()
                    .with_current_span(false)
                    .try_init()
            };
            drop(result);
            Some(guard)
        }
        None => {
            let result = if config.format == "pretty" {
                fmt().with_env_filter(filter).with_target(true).try_init()
            } else {
                fmt()
                    .with_env_filter(filter)
                    .json()
                    .with_current_span(false)
                    .try_init()
            };
            drop(result);
            None
        }
    }
}
