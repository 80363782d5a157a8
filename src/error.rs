//! Centralized error types for mgit
//!
//! This module provides a unified error handling approach using thiserror.
//! Adapters raise these at the port boundary; the engine converts them to
//! per-item outcomes when they pertain to one repository, or to a fatal
//! result when they pertain to the whole run.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mgit operations
#[derive(Error, Debug)]
pub enum MgitError {
    /// Invalid or expired credential
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Requested entity does not exist on the provider
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Provider rate limit exhausted after the retry budget
    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        reset_at: Option<DateTime<Utc>>,
    },

    /// Network failure (unreachable host, timeout, TLS)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authenticated but not allowed
    #[error("Permission denied: {message}")]
    Permission { message: String },

    /// Provider returned an unexpected response
    #[error("Provider error: {message}")]
    ProviderInternal { message: String },

    /// Configuration errors (missing fields, bad permissions, unreadable file)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed query pattern
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Unsupported argument combination at the port boundary
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Git subprocess failure; message is already masked
    #[error("Git error: {message}")]
    Git { message: String },

    /// I/O operation errors
    #[error("I/O error: {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Cooperative shutdown requested by the user
    #[error("Operation cancelled")]
    Cancelled,
}

impl MgitError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, reset_at: Option<DateTime<Utc>>) -> Self {
        Self::RateLimit {
            message: message.into(),
            reset_at,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::ProviderInternal {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn git(message: impl Into<String>) -> Self {
        Self::Git {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether a retry of the same request can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ProviderInternal { .. } | Self::RateLimit { .. }
        )
    }

    /// Process exit code for this error when it terminates a command
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Auth { .. } => 2,
            Self::Config { .. } => 3,
            Self::InvalidQuery { .. } | Self::InvalidArgument { .. } => 4,
            Self::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result type alias for mgit operations
pub type Result<T> = std::result::Result<T, MgitError>;

impl From<std::io::Error> for MgitError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for MgitError {
    fn from(err: reqwest::Error) -> Self {
        // Connection-level failures; status-mapped errors are produced by
        // providers::http before this conversion can fire.
        Self::Network {
            message: err.without_url().to_string(),
        }
    }
}
