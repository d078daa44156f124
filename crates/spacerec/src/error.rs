use std::sync::Arc;

use reqwest::StatusCode;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by watchers and callers to
/// decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-level or server-side hiccup; retried locally.
    Transient,
    /// The remote side rejected the current credentials.
    Authentication,
    /// A final HTTP status (4xx other than 404/408/429); retrying will not help.
    Rejected,
    /// The capture manifest is empty or unparseable.
    Manifest,
    /// A chunk exhausted its retry budget.
    ChunkFetch,
    /// The resource does not exist.
    NotFound,
    /// The resource ended without anything to capture.
    Ended,
    /// Cooperative stop.
    Cancelled,
    Io,
    Configuration,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network { source: Arc<reqwest::Error> },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("credentials rejected with HTTP {status} for {url}")]
    Authentication { status: StatusCode, url: String },

    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("chunk #{index} failed after {attempts} attempt(s): {source}")]
    ChunkFetch {
        index: u64,
        attempts: u32,
        source: Arc<Error>,
    },

    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("resource {resource} ended with nothing to capture")]
    Ended { resource: String },

    #[error("giving up after {attempts} consecutive transient errors, last: {source}")]
    RetriesExhausted { attempts: u32, source: Arc<Error> },

    #[error("I/O error: {source}")]
    Io { source: Arc<std::io::Error> },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(err),
        }
    }
}

impl Error {
    pub fn invalid_url(input: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Network { .. } | Self::MalformedResponse { .. } | Self::RetriesExhausted { .. } => {
                ErrorKind::Transient
            }
            Self::HttpStatus { status, .. } => match *status {
                StatusCode::NOT_FOUND => ErrorKind::NotFound,
                s if is_retryable_status(s) => ErrorKind::Transient,
                _ => ErrorKind::Rejected,
            },
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::InvalidUrl { .. } | Self::Manifest { .. } => ErrorKind::Manifest,
            Self::ChunkFetch { .. } => ErrorKind::ChunkFetch,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ended { .. } => ErrorKind::Ended,
            Self::Io { .. } => ErrorKind::Io,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// `RetriesExhausted` is the terminal form of a transient failure and is
    /// not retryable itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { source } => !source.is_builder() && !source.is_redirect(),
            Self::MalformedResponse { .. } => true,
            Self::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The error a `ChunkFetch` or `RetriesExhausted` wraps, or `self`.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::ChunkFetch { source, .. } | Self::RetriesExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// 5xx, 408 and 429 are worth another attempt; other statuses are final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
