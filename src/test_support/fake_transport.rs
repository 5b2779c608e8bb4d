//! Scripted [`Transport`] for exercising the download core without sockets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};

use crate::download::{ByteStream, DownloadError, HttpResponse, Transport};

/// Body served by a scripted 200 response.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBody {
    pub chunks: Vec<Vec<u8>>,
    pub content_length: Option<String>,
    pub chunk_delay: Option<Duration>,
    /// Break the stream after this many chunks.
    pub truncate_after: Option<usize>,
}

impl FakeBody {
    pub(crate) fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    pub(crate) fn with_content_length(mut self, declared: &str) -> Self {
        self.content_length = Some(declared.to_string());
        self
    }

    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub(crate) fn truncated_after(mut self, chunks: usize) -> Self {
        self.truncate_after = Some(chunks);
        self
    }
}

/// One scripted reply to a GET.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Status(u16),
    ConnectionFailure,
    Body(FakeBody),
}

/// Transport replaying a script; the last entry repeats once the script runs out.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    head_length: Option<u64>,
    head_delay: Option<Duration>,
    get_calls: AtomicUsize,
    head_calls: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_script(self, entries: Vec<Scripted>) -> Self {
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = entries.into();
        self
    }

    pub(crate) fn with_head_length(mut self, length: Option<u64>) -> Self {
        self.head_length = length;
        self
    }

    pub(crate) fn with_head_delay(mut self, delay: Duration) -> Self {
        self.head_delay = Some(delay);
        self
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    fn next_entry(&self) -> Option<Scripted> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match next {
            Some(entry) => {
                *last = Some(entry.clone());
                Some(entry)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, DownloadError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_entry() {
            Some(Scripted::Status(status)) => Err(DownloadError::http_status(url, status)),
            Some(Scripted::ConnectionFailure) | None => Err(DownloadError::timeout(url)),
            Some(Scripted::Body(body)) => {
                let mut headers = HeaderMap::new();
                if let Some(declared) = body.content_length.as_deref()
                    && let Ok(value) = HeaderValue::from_str(declared)
                {
                    headers.insert(CONTENT_LENGTH, value);
                }
                Ok(HttpResponse::new(200, headers, None, body_stream(url, body)))
            }
        }
    }

    async fn head(&self, url: &str) -> Result<HeaderMap, DownloadError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.head_delay {
            tokio::time::sleep(delay).await;
        }
        let mut headers = HeaderMap::new();
        match self.head_length {
            Some(length) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                Ok(headers)
            }
            None => Err(DownloadError::http_status(url, 405)),
        }
    }
}

fn body_stream(url: &str, body: FakeBody) -> ByteStream {
    let FakeBody {
        chunks,
        chunk_delay,
        truncate_after,
        ..
    } = body;
    let mut items: Vec<Result<Bytes, DownloadError>> =
        chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))).collect();
    if let Some(count) = truncate_after {
        items.truncate(count);
        items.push(Err(DownloadError::stream_interrupted(
            url,
            "connection reset by peer",
        )));
    }
    match chunk_delay {
        None => stream::iter(items).boxed(),
        Some(delay) => stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed(),
    }
}

/// Builds a 200 response with the given headers and body chunks.
pub(crate) fn response_with_headers(
    headers: &[(&str, &str)],
    length_hint: Option<u64>,
    chunks: Vec<Vec<u8>>,
) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    let body = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, DownloadError>(Bytes::from(chunk))),
    )
    .boxed();
    HttpResponse::new(200, map, length_hint, body)
}
