//! Content-length resolution for streaming responses.
//!
//! The expected size comes from, in order: the declared `Content-Length`
//! header, the transport's remaining-bytes hint, and finally a HEAD probe run
//! on a background task. The probe never blocks the stream; the writer polls it
//! once per chunk through [`LengthProbe::poll`].

use std::sync::Arc;

use futures_util::FutureExt;
use reqwest::header::CONTENT_LENGTH;
use tokio::task::JoinHandle;
use tracing::debug;

use super::constants::PROBE_TIMEOUT;
use super::transport::{HttpResponse, Transport};

/// Where a missing length may be probed from.
#[derive(Clone)]
pub struct ProbeTarget {
    /// Transport used for the HEAD request.
    pub transport: Arc<dyn Transport>,
    /// URL of the resource being streamed.
    pub url: String,
}

impl std::fmt::Debug for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTarget")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Result of a non-blocking probe poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePoll {
    /// The HEAD request is still in flight.
    Pending,
    /// The probe finished; `None` means it produced no usable length.
    Ready(Option<u64>),
}

/// Background HEAD request resolving a missing content length.
///
/// Dropping the probe aborts the background task.
#[derive(Debug)]
pub struct LengthProbe {
    handle: JoinHandle<Option<u64>>,
}

impl LengthProbe {
    /// Spawns the probe onto the current Tokio runtime.
    #[must_use]
    pub fn spawn(target: ProbeTarget) -> Self {
        let handle = tokio::spawn(async move {
            let ProbeTarget { transport, url } = target;
            probe_content_length(transport.as_ref(), &url).await
        });
        Self { handle }
    }

    /// Checks the probe without waiting.
    pub fn poll(&mut self) -> ProbePoll {
        if !self.handle.is_finished() {
            return ProbePoll::Pending;
        }
        match (&mut self.handle).now_or_never() {
            Some(Ok(length)) => ProbePoll::Ready(length),
            Some(Err(join_error)) => {
                debug!(error = %join_error, "length probe task failed");
                ProbePoll::Ready(None)
            }
            None => ProbePoll::Pending,
        }
    }
}

impl Drop for LengthProbe {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Parses a declared length, treating zero, negative and non-numeric values as absent.
#[must_use]
pub fn normalize_length(value: Option<&str>) -> Option<u64> {
    let number = value?.trim().parse::<i128>().ok()?;
    if number <= 0 {
        return None;
    }
    u64::try_from(number).ok()
}

/// Returns a positive length from response metadata alone.
#[must_use]
pub fn response_length(response: &HttpResponse) -> Option<u64> {
    normalize_length(response.header(CONTENT_LENGTH.as_str()))
        .or_else(|| response.length_hint().filter(|hint| *hint > 0))
}

/// Resolves the expected length of `response`.
///
/// When metadata has no usable length and a probe target is supplied, a HEAD
/// probe is started in the background and returned for the caller to poll.
/// Without a target the stream runs in unknown-length mode from the start.
#[must_use]
pub fn resolve_content_length(
    response: &HttpResponse,
    probe: Option<ProbeTarget>,
) -> (Option<u64>, Option<LengthProbe>) {
    let length = response_length(response);
    if length.is_some() {
        return (length, None);
    }
    match probe {
        Some(target) => {
            debug!(url = %target.url, "content length missing, probing in background");
            (None, Some(LengthProbe::spawn(target)))
        }
        None => (None, None),
    }
}

/// Best-effort HEAD request; any failure reads as "no length".
pub async fn probe_content_length(transport: &dyn Transport, url: &str) -> Option<u64> {
    match tokio::time::timeout(PROBE_TIMEOUT, transport.head(url)).await {
        Ok(Ok(headers)) => normalize_length(
            headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok()),
        ),
        Ok(Err(error)) => {
            debug!(url, error = %error, "length probe failed");
            None
        }
        Err(_) => {
            debug!(url, "length probe timed out");
            None
        }
    }
}
