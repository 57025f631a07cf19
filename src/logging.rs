//! Tracing setup for the binary.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Log file prefix inside `logging.directory`.
const LOG_FILE_PREFIX: &str = "chat-relay.log";

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
///
/// With `logging.directory` set, output goes to a daily-rolling file through
/// a non-blocking writer; keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
            Ok(None)
        }
    }
}
