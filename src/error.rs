//! Error types for zvuk-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - the crate-wide error type returned by fallible operations
//! - [`CacheError`] - failures of the persistent response cache
//! - [`FailureClass`] - the per-track classification surfaced in run reports
//!
//! Every [`Error`] maps to exactly one [`FailureClass`], which decides whether the
//! scheduler retries a track, records it as terminal, or aborts the whole run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::ContentRef;

/// Result type alias for zvuk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zvuk-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.concurrency")
        key: Option<String>,
    },

    /// Input URL is not one of the recognized content forms
    #[error("unrecognized content URL: {0}")]
    InvalidUrl(String),

    /// Credentials were rejected (HTTP 401/403) or are missing
    #[error("authentication expired or rejected (status {status})")]
    AuthExpired {
        /// HTTP status returned by the service (0 when no request was made)
        status: u16,
    },

    /// The requested item cannot be streamed at any quality
    #[error("{0} is unavailable")]
    Unavailable(String),

    /// The service throttled the request (HTTP 429)
    #[error("rate limited by the service")]
    RateLimited,

    /// Transport-level network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Unexpected HTTP status from the service
    #[error("HTTP error: status {status} for {endpoint}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Endpoint path that returned the status
        endpoint: String,
    },

    /// Media transfer ended before the declared content length was received
    #[error("incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer {
        /// Bytes actually written
        received: u64,
        /// Bytes announced by the server
        expected: u64,
    },

    /// The service answered with a payload that does not have the expected shape
    #[error("unexpected API payload: {0}")]
    Api(String),

    /// Resolution of a container failed before any item could be gathered
    #[error("failed to resolve {content}: {reason}")]
    Resolution {
        /// The container being resolved
        content: ContentRef,
        /// What went wrong
        reason: String,
    },

    /// Response cache failure
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// SQLx database error
    #[error("cache database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Local filesystem error while writing a track
    #[error("write error at {path}: {source}")]
    Write {
        /// Path being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled (user interrupt)
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Response cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to open the cache database
    #[error("failed to open cache: {0}")]
    OpenFailed(String),

    /// Failed to create the cache schema
    #[error("failed to initialize cache schema: {0}")]
    SchemaFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored payload could not be decoded
    #[error("corrupt cache entry {fingerprint}: {reason}")]
    Corrupt {
        /// Fingerprint of the corrupt entry
        fingerprint: String,
        /// Decode failure
        reason: String,
    },
}

/// Per-track failure class, as surfaced in the run report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transport failure; retried with bounded backoff
    NetworkError,
    /// Credentials rejected; fatal for the whole run
    AuthExpired,
    /// Service throttling; retried like a network error
    RateLimited,
    /// The track cannot be delivered; permanent
    Unavailable,
    /// Local filesystem failure; not retried within a run
    WriteError,
    /// Transfer aborted by a run-level cancellation
    Cancelled,
}

impl FailureClass {
    /// Machine-readable name used in summaries and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::NetworkError => "network_error",
            FailureClass::AuthExpired => "auth_expired",
            FailureClass::RateLimited => "rate_limited",
            FailureClass::Unavailable => "unavailable",
            FailureClass::WriteError => "write_error",
            FailureClass::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for per-track reporting and retry decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::AuthExpired { .. } => FailureClass::AuthExpired,
            Error::RateLimited => FailureClass::RateLimited,
            Error::Unavailable(_) => FailureClass::Unavailable,
            Error::Write { .. } | Error::Io(_) => FailureClass::WriteError,
            Error::Cancelled => FailureClass::Cancelled,
            Error::Network(_) | Error::IncompleteTransfer { .. } => FailureClass::NetworkError,
            // 5xx is a service hiccup, other statuses mean the item is not there for us
            Error::Http { status, .. } if *status >= 500 => FailureClass::NetworkError,
            Error::Http { .. } => FailureClass::Unavailable,
            Error::Api(_) | Error::Resolution { .. } | Error::InvalidUrl(_) => {
                FailureClass::Unavailable
            }
            Error::Serialization(_) => FailureClass::Unavailable,
            Error::Cache(_) | Error::Sqlx(_) => FailureClass::WriteError,
            Error::Config { .. } | Error::Other(_) => FailureClass::Unavailable,
        }
    }

    /// True when the error means the credentials are no longer usable.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired { .. })
    }

    /// Map an HTTP status from the catalog API into an error, if it is one.
    ///
    /// 401 and 403 are treated uniformly as [`Error::AuthExpired`].
    pub fn from_status(status: u16, endpoint: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Error::AuthExpired { status }),
            429 => Some(Error::RateLimited),
            _ => Some(Error::Http {
                status,
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

/// A per-track failure as recorded in a [`DownloadResult`](crate::types::DownloadResult)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackError {
    /// Failure class
    pub class: FailureClass,
    /// Human-readable detail
    pub message: String,
    /// Number of attempts made before giving up
    pub attempts: u32,
}

impl TrackError {
    /// Build a track error from a crate error and the number of attempts made.
    pub fn from_error(error: &Error, attempts: u32) -> Self {
        Self {
            class: error.failure_class(),
            message: error.to_string(),
            attempts,
        }
    }
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}
