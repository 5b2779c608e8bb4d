//! Error types for the download module.
//!
//! [`DownloadError`] describes what went wrong on the wire or on disk during a
//! single attempt. [`FailureKind`] is the classifier's view of that failure and
//! decides which retry path applies.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection-level error (DNS resolution, connection refused, TLS, reset).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before the response headers arrived.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The body stream broke off before the server finished sending it.
    #[error("stream interrupted downloading {url}: {reason}")]
    StreamInterrupted {
        /// The URL whose body was truncated.
        url: String,
        /// Transport-level description of the interruption.
        reason: String,
    },

    /// File system error while writing the temporary file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be built from its settings.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a mid-stream truncation error.
    pub fn stream_interrupted(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamInterrupted {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client_build(source: reqwest::Error) -> Self {
        Self::ClientBuild { source }
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when no HTTP response was received at all.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

/// Classification of an attempt failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server claims to be healthy but the request failed; short backoff.
    TransientNetwork,
    /// Status page reports a maintenance window; long backoff or skip.
    ServerMaintenance,
    /// Subdomain unreachable and not reported healthy; abandon.
    ServerOffline,
    /// HTTP 429.
    RateLimited,
    /// HTTP 503.
    ServiceUnavailable,
    /// HTTP 502; tolerated once more, then abandoned.
    BadGateway,
    /// Body ended early or did not match the declared length.
    StreamTruncated,
    /// The temporary file could not be renamed into place.
    FinalizeFailure,
    /// Anything else; abandon.
    Unclassified,
}

impl FailureKind {
    /// Short label used in log events.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient network failure",
            Self::ServerMaintenance => "server maintenance",
            Self::ServerOffline => "server offline",
            Self::RateLimited => "rate limited",
            Self::ServiceUnavailable => "service unavailable",
            Self::BadGateway => "bad gateway",
            Self::StreamTruncated => "stream truncated",
            Self::FinalizeFailure => "finalize failure",
            Self::Unclassified => "unclassified failure",
        }
    }
}
