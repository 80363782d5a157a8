//! Central constants for mgit configuration
//!
//! All defaults for paths, limits, and timing should be defined here
//! to avoid duplication and ensure consistency across the codebase.

use std::sync::atomic::AtomicBool;

/// Name of the mgit config directory inside the user config dir
pub const CONFIG_DIR_NAME: &str = "mgit";

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "MGIT_CONFIG";

/// Name of the log directory inside the mgit config dir
pub const LOG_DIR_NAME: &str = "logs";

/// Name of the log file
pub const LOG_FILE_NAME: &str = "mgit.log";

/// Maximum size of each log file in MB before rotation
pub const DEFAULT_LOG_MAX_SIZE_MB: usize = 10;

/// Maximum number of rotated log files to retain
pub const DEFAULT_LOG_MAX_FILES: usize = 5;

/// Number of days to retain log files
pub const DEFAULT_LOG_RETENTION_DAYS: usize = 14;

/// Hard cap on the bulk engine worker pool
pub const MAX_CONCURRENCY: usize = 50;

/// Per-subprocess timeout for git clone/pull, seconds
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 600;

/// Per-HTTP-call timeout, seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Grace period after cancellation before child processes are killed, seconds
pub const CANCEL_GRACE_SECS: u64 = 5;

/// Page size requested from provider list endpoints
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Retry budget for transient HTTP failures
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff, milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Jitter applied to each backoff delay (fraction of the delay)
pub const RETRY_JITTER: f64 = 0.2;

/// Maximum accepted query pattern length
pub const QUERY_MAX_LEN: usize = 512;

/// Maximum length of a sanitized destination directory name
pub const SANITIZED_NAME_MAX_LEN: usize = 128;

/// Cross-account concurrency cap for the query engine
pub const QUERY_ACCOUNT_CONCURRENCY: usize = 5;

/// Buffer of the merged query result stream
pub const QUERY_STREAM_BUFFER: usize = 64;

/// User agent sent on every provider API call
pub const USER_AGENT: &str = concat!("mgit/", env!("CARGO_PKG_VERSION"));

/// Set once the first CTRL-C has been received
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
