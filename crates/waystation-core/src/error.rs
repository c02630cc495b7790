//! Error types for the interception engine.
//!
//! Every I/O failure is converted into one of these kinds at the strategy or
//! store boundary, so callers of the engine never see raw transport or
//! database errors.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single resource that could not be fetched during warm-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupFailure {
    /// Resolved URL of the resource.
    pub url: String,
    /// Why the fetch or commit failed.
    pub reason: String,
}

impl std::fmt::Display for WarmupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.reason)
    }
}

/// Main error type for the engine.
#[derive(Debug, Error)]
pub enum Error {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Store errors
    #[error("Cache store '{store}' unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Strategy outcomes
    #[error("Resource unavailable from network and cache: {key}")]
    ResourceUnavailable { key: String },

    #[error("Fallback document missing from cache: {key}")]
    FallbackUnavailable { key: String },

    // Lifecycle errors
    #[error("Warm-up of store '{store}' failed for {} resource(s): {}", .failures.len(), format_failures(.failures))]
    Warmup {
        store: String,
        failures: Vec<WarmupFailure>,
    },

    #[error("Invalid lifecycle state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

fn format_failures(failures: &[WarmupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl Error {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether the failure is transient and a later step may still succeed.
    ///
    /// Transient errors are never retried at the same step; strategies fall
    /// through to their next step instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Timeout(_) | Error::StoreUnavailable { .. }
        )
    }

    /// HTTP status a host should answer with when surfacing this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ResourceUnavailable { .. } | Error::Timeout(_) => 504,
            Error::FallbackUnavailable { .. }
            | Error::Config { .. }
            | Error::InvalidState { .. } => 500,
            Error::StoreUnavailable { .. } | Error::Warmup { .. } => 503,
            _ => 502,
        }
    }
}
