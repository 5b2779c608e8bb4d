//! HTTP client wrapper implementing [`Transport`] over `reqwest`.
//!
//! The client is created once per run and shared by every download, taking
//! advantage of connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, PROBE_TIMEOUT, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use super::transport::{HttpResponse, Transport};
use crate::user_agent;

/// Request identity and timeouts for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// User-Agent header value.
    pub user_agent: String,
    /// Referer header value; `None` sends no referer.
    pub referer: Option<String>,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed between reads, headers included.
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_download_user_agent(),
            referer: Some(user_agent::DEFAULT_REFERER.to_string()),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

/// HTTP client for streaming downloads.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default browser identity and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_settings(&ClientSettings::default())
    }

    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the referer is not a URL and
    /// [`DownloadError::ClientBuild`] if the builder rejects the settings
    /// (for example a User-Agent with control characters).
    #[instrument(level = "debug", skip(settings), fields(user_agent = %settings.user_agent))]
    pub fn with_settings(settings: &ClientSettings) -> Result<Self, DownloadError> {
        if let Some(referer) = settings.referer.as_deref() {
            Url::parse(referer).map_err(|_| DownloadError::invalid_url(referer))?;
        }

        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .gzip(true)
            .user_agent(settings.user_agent.as_str())
            .default_headers(user_agent::default_headers(settings.referer.as_deref()))
            .build()
            .map_err(DownloadError::client_build)?;
        Ok(Self { client })
    }
}

fn request_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

#[async_trait]
impl Transport for HttpClient {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<HttpResponse, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success response");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let headers = response.headers().clone();
        let length_hint = response.content_length();
        let stream_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::stream_interrupted(stream_url.as_str(), e.to_string()))
            })
            .boxed();

        Ok(HttpResponse::new(status.as_u16(), headers, length_hint, body))
    }

    async fn head(&self, url: &str) -> Result<HeaderMap, DownloadError> {
        let response = self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response.headers().clone())
    }
}
