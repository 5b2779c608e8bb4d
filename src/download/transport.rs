//! HTTP capability consumed by the download core.
//!
//! The core never talks to `reqwest` directly: it asks a [`Transport`] for a
//! streaming GET or a HEAD probe. [`HttpClient`](super::HttpClient) is the
//! production implementation; tests substitute scripted transports.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::header::HeaderMap;

use super::DownloadError;

/// Chunk-producing body of a streaming response.
pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// A successful (2xx) response whose body has not been consumed yet.
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    length_hint: Option<u64>,
    body: ByteStream,
}

impl HttpResponse {
    /// Assembles a response from its parts.
    ///
    /// `length_hint` is the transport's own idea of the remaining body size,
    /// consulted only when the declared `Content-Length` is missing or unusable.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, length_hint: Option<u64>, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            length_hint,
            body,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Case-insensitive header lookup; non-UTF-8 values read as absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Transport-level remaining-bytes hint.
    #[must_use]
    pub fn length_hint(&self) -> Option<u64> {
        self.length_hint
    }

    /// Consumes the response, yielding its body stream.
    #[must_use]
    pub fn into_body(self) -> ByteStream {
        self.body
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("length_hint", &self.length_hint)
            .finish_non_exhaustive()
    }
}

/// Streaming HTTP client capability.
///
/// Implementations must keep the three failure classes distinguishable:
/// connection failures as [`DownloadError::Network`] / [`DownloadError::Timeout`],
/// non-2xx responses as [`DownloadError::HttpStatus`], and mid-body breakage as
/// [`DownloadError::StreamInterrupted`] items inside the body stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a streaming GET. Non-2xx statuses are returned as errors.
    async fn get(&self, url: &str) -> Result<HttpResponse, DownloadError>;

    /// Issues a HEAD request and returns the response headers.
    async fn head(&self, url: &str) -> Result<HeaderMap, DownloadError>;
}
