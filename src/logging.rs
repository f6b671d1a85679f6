use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "RENTDESK_LOG";

/// Where log files go: $XDG_DATA_HOME/rentdesk/logs
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("rentdesk").join("logs"))
}

/// Install the global subscriber.
///
/// The terminal belongs to the console, so logs go to a daily file. Keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let dir = log_dir().ok_or_else(|| eyre!("Could not determine a data directory for logs"))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "rentdesk.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
