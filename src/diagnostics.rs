//! Logging setup.
//!
//! All records go to stderr. When [`LoggingConfig::file_enabled`] is set they
//! are also written to daily files named `updogo.log.YYYY-MM-DD` in the log
//! directory; files older than [`MAX_LOG_AGE_DAYS`] days or beyond
//! [`MAX_LOG_FILES`] are pruned at startup.

use crate::config::LoggingConfig;
use crate::error::{Result, RobotError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Prefix of rolling log files.
pub const LOG_FILE_PREFIX: &str = "updogo.log";

/// Maximum age (in days) of log files to keep.
pub const MAX_LOG_AGE_DAYS: u64 = 7;

/// Maximum number of log files to keep.
pub const MAX_LOG_FILES: usize = 10;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. The returned guard flushes the file
/// writer on drop and must be kept alive for the lifetime of the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true);

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init()
            .map_err(|e| RobotError::Config(format!("logging already initialised: {e}")))?;
        return Ok(None);
    }

    let dir = config.log_directory();
    fs::create_dir_all(&dir)?;
    prune_old_logs(&dir);

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| RobotError::Config(format!("logging already initialised: {e}")))?;

    tracing::info!(directory = %dir.display(), "file logging enabled");
    Ok(Some(guard))
}

/// Remove log files older than [`MAX_LOG_AGE_DAYS`] or beyond [`MAX_LOG_FILES`].
fn prune_old_logs(log_dir: &Path) {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(MAX_LOG_AGE_DAYS * 86_400))
        .unwrap_or(UNIX_EPOCH);
    prune_old_logs_with_cutoff(log_dir, cutoff, MAX_LOG_FILES);
}

fn prune_old_logs_with_cutoff(log_dir: &Path, cutoff: SystemTime, max_files: usize) {
    let mut entries: Vec<(PathBuf, SystemTime)> = match fs::read_dir(log_dir) {
        Ok(dir) => dir
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?.to_owned();
                if name.starts_with(LOG_FILE_PREFIX) {
                    let mtime = path.metadata().ok()?.modified().ok()?;
                    Some((path, mtime))
                } else {
                    None
                }
            })
            .collect(),
        Err(_) => return,
    };

    // Newest first.
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    for (i, (path, mtime)) in entries.iter().enumerate() {
        if *mtime < cutoff || i >= max_files {
            if let Err(e) = fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "could not prune log file");
            }
        }
    }
}
