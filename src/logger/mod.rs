//!
//! Centralized logging configuration with:
//! - Size-based log file rotation at startup
//! - One-shot cleanup of old logs (mgit is short-lived; no background task)
//! - Log storage under the user config dir (~/.config/mgit/logs/)
//! - Configurable via environment variables
//!

use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::{
    DEFAULT_LOG_MAX_FILES, DEFAULT_LOG_MAX_SIZE_MB, DEFAULT_LOG_RETENTION_DAYS, LOG_DIR_NAME,
    LOG_FILE_NAME,
};
use crate::error::{MgitError, Result};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log rotation configuration
#[derive(Debug, Clone)]
pub struct LogRotationConfig {
    /// Maximum size of each log file in MB
    pub max_size_mb: usize,
    /// Maximum number of log files to retain
    pub max_files: usize,
    /// Number of days to retain log files
    pub retention_days: i64,
}

impl LogRotationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            max_size_mb: std::env::var("MGIT_LOG_MAX_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LOG_MAX_SIZE_MB),
            max_files: std::env::var("MGIT_LOG_MAX_FILES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LOG_MAX_FILES),
            retention_days: std::env::var("MGIT_LOG_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LOG_RETENTION_DAYS as i64),
        }
    }
}

/// Log directory next to the config file
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(LOG_DIR_NAME)
}

/// Check if current log file exceeds max size and rotate if needed
pub fn rotate_if_needed(log_dir: &Path, config: &LogRotationConfig) -> Result<()> {
    let current_path = log_dir.join(LOG_FILE_NAME);

    if let Ok(metadata) = fs::metadata(&current_path) {
        let file_size_mb = metadata.len() / (1024 * 1024);
        if file_size_mb >= config.max_size_mb as u64 {
            tracing::debug!(
                "log file size limit reached ({} MB >= {} MB), rotating",
                file_size_mb,
                config.max_size_mb
            );

            // Shift existing numbered files up
            for i in (1..config.max_files).rev() {
                let from = log_dir.join(format!("{}.{}", LOG_FILE_NAME, i));
                let to = log_dir.join(format!("{}.{}", LOG_FILE_NAME, i + 1));
                if from.exists() {
                    fs::rename(&from, &to)?;
                }
            }

            if current_path.exists() {
                let rotated_path = log_dir.join(format!("{}.1", LOG_FILE_NAME));
                fs::rename(&current_path, &rotated_path)?;
            }
        }
    }

    Ok(())
}

/// Remove log files older than the retention period
pub fn cleanup_old_logs(log_dir: &Path, config: &LogRotationConfig) -> Result<()> {
    let cutoff_time = Utc::now() - Duration::days(config.retention_days);

    if !log_dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !file_name.starts_with(LOG_FILE_NAME) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified_time: chrono::DateTime<Utc> = modified.into();
        if modified_time < cutoff_time {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("failed to remove old log file {:?}: {}", path, e);
            }
        }
    }

    Ok(())
}

/// Initialize tracing with a stderr layer and a rotating file layer.
///
/// stdout stays reserved for program output (tables, JSON, summaries).
/// Returns the log directory so callers can mention it in diagnostics.
pub fn init_logger(config_dir: &Path, level: LogLevel, quiet: bool) -> Result<PathBuf> {
    let log_dir = get_log_dir(config_dir);
    fs::create_dir_all(&log_dir)
        .map_err(|e| MgitError::io(&log_dir, format!("cannot create log dir: {}", e)))?;

    let rotation = LogRotationConfig::from_env();
    rotate_if_needed(&log_dir, &rotation)?;
    cleanup_old_logs(&log_dir, &rotation)?;

    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, LOG_FILE_NAME);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mgit={}", level.as_str())))
        // Dependencies stay quiet unless explicitly requested
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if quiet {
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);
        subscriber
            .with(file_layer)
            .try_init()
            .map_err(|e| MgitError::config(format!("cannot init logger: {}", e)))?;
    } else {
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .with(file_layer)
            .try_init()
            .map_err(|e| MgitError::config(format!("cannot init logger: {}", e)))?;
    }

    Ok(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("invalid"), None);
    }

    #[test]
    fn test_rotate_if_needed() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path();

        // Small file: no rotation
        let current_path = log_dir.join(LOG_FILE_NAME);
        let mut file = File::create(&current_path).unwrap();
        write!(file, "small file").unwrap();

        let config = LogRotationConfig {
            max_size_mb: 10,
            max_files: 5,
            retention_days: 5,
        };

        rotate_if_needed(log_dir, &config).unwrap();
        assert!(current_path.exists());

        // Oversized file: rotated to .1
        let large_content = "x".repeat(11 * 1024 * 1024);
        let mut file = File::create(&current_path).unwrap();
        write!(file, "{}", large_content).unwrap();

        rotate_if_needed(log_dir, &config).unwrap();
        assert!(!current_path.exists());
        assert!(log_dir.join(format!("{}.1", LOG_FILE_NAME)).exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogRotationConfig {
            max_size_mb: 10,
            max_files: 5,
            retention_days: 5,
        };
        cleanup_old_logs(&temp_dir.path().join("never-created"), &config).unwrap();
    }
}
