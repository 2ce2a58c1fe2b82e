//! Process-wide log setup.
//!
//! Called once by the entry point before a session is built. Everything
//! after that logs through the `tracing` macros into one append-only file.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigurationError;

/// Default log file, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "track.log";

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "debug";

/// Where the log goes and what it records.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file, appended to across runs.
    pub path: PathBuf,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_FILE),
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Split the path into its directory and file name.
    fn location(&self) -> Result<(PathBuf, &std::ffi::OsStr), ConfigurationError> {
        let file_name = self.path.file_name().ok_or_else(|| self.error("no file name"))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((dir, file_name))
    }

    fn error(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::LogFile {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Keeps the background log writer alive. Dropping it flushes pending lines.
#[derive(Debug)]
pub struct LogGuard {
    _worker: WorkerGuard,
    path: PathBuf,
}

impl LogGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Install the global subscriber writing to `config.path`.
///
/// # Errors
/// `ConfigurationError::LogFile` if the file cannot be opened for append or a
/// global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<LogGuard, ConfigurationError> {
    let (dir, file_name) = config.location()?;
    fs::create_dir_all(&dir).map_err(|e| config.error(e.to_string()))?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.path)
        .map_err(|e| config.error(e.to_string()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| config.error(e.to_string()))?;

    Ok(LogGuard {
        _worker: worker,
        path: config.path.clone(),
    })
}
