//! Error types for catalog-extract
//!
//! Errors fall into two groups:
//! - Setup and cursor errors ([`Error`]) which abort an extraction run and are
//!   returned to the caller
//! - Per-item fetch errors ([`FetchError`]) which are absorbed by the fetch
//!   loop, logged, and never surface to the consumer of the item stream

use thiserror::Error;

/// Result type alias for catalog-extract operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-extract
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "queue-size")
        key: Option<String>,
    },

    /// The remote catalog could not be queried (fatal for the whole run)
    #[error("catalog query failed: {0}")]
    Catalog(#[from] CatalogError),

    /// Cursor store operation failed
    #[error("cursor error: {0}")]
    Cursor(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// HTTP client could not be built
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Config`] for a specific option key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors raised while querying the remote catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The request never produced a response (connect failure, timeout, TLS)
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// The catalog endpoint URL
        url: String,
        /// The underlying transport failure
        reason: String,
    },

    /// The catalog endpoint answered with a non-success status
    #[error("catalog endpoint {url} returned HTTP {status}")]
    Status {
        /// The catalog endpoint URL
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// The response body was not a JSON array of strings
    #[error("invalid catalog response from {url}: {reason}")]
    InvalidResponse {
        /// The catalog endpoint URL
        url: String,
        /// Why the body could not be used
        reason: String,
    },
}

/// Per-item fetch failures
///
/// These never abort a run. The fetch loop logs them and moves on to the
/// next identifier.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request timed out
    #[error("timed out fetching {url}")]
    Timeout {
        /// The item URL
        url: String,
    },

    /// Connection or other transport failure
    #[error("transport error fetching {url}: {reason}")]
    Transport {
        /// The item URL
        url: String,
        /// The underlying transport failure
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The item URL
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// The declared content type was not JSON
    #[error("unexpected content type {content_type:?} from {url}")]
    NotJson {
        /// The item URL
        url: String,
        /// The declared content type (empty if the header was missing)
        content_type: String,
    },

    /// The body claimed to be JSON but could not be decoded into an item
    #[error("invalid item body from {url}: {reason}")]
    InvalidBody {
        /// The item URL
        url: String,
        /// Why the body could not be decoded
        reason: String,
    },
}

impl FetchError {
    /// The URL of the request that failed
    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url }
            | FetchError::Transport { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::NotJson { url, .. }
            | FetchError::InvalidBody { url, .. } => url,
        }
    }
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

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}
