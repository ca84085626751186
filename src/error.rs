//! Error types for wayback-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`FetchError`] for everything that can go wrong while talking to the CDX index
//! - [`DatabaseError`] for the SQLite record and fetch-state stores
//! - [`Error`], the crate-wide error that wraps both

use std::time::Duration;
use thiserror::Error;

/// Result type alias for wayback-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of response body bytes kept in [`FetchError::HttpStatus`]
pub const MAX_ERROR_BODY_LEN: usize = 512;

/// Main error type for wayback-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.endpoint")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// CDX index fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller-supplied input could not be used (empty domain, unparseable URL, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A harvest for this domain is already running in this process
    #[error("harvest already running for domain {0}")]
    AlreadyRunning(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors raised while fetching a page from the CDX index
///
/// Every variant carries enough information for [`crate::retry::classify`] to
/// decide between retrying the page and giving up on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network, DNS or connection failure before a response arrived
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status
    #[error("CDX API returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body, truncated to [`MAX_ERROR_BODY_LEN`] bytes
        body: String,
    },

    /// The body could not be gunzipped or was not the expected JSON/text shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The per-request deadline elapsed
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired
    #[error("cancelled")]
    Cancelled,

    /// A retryable error persisted past the retry budget
    #[error("request failed after {attempts} retries: {source}")]
    RetriesExhausted {
        /// Number of retries that were attempted
        attempts: u32,
        /// The last retryable error observed
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Build an [`FetchError::HttpStatus`], truncating the body on a char boundary
    pub fn http_status(status: u16, body: &str) -> Self {
        let mut end = body.len().min(MAX_ERROR_BODY_LEN);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        FetchError::HttpStatus {
            status,
            body: body[..end].to_string(),
        }
    }

    /// Returns true if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
