//! Host status tracking backed by the public status page.
//!
//! Download links are served from numbered hosts (`cdn12.example.com`). The
//! status page lists each host by its capitalized first label (`Cdn12`) next
//! to a free-text status such as `Operational` or `Under maintenance`.
//! [`ServerStatusCache`] keeps a live map of those statuses, refreshes it from
//! a [`StatusSource`] at most once per TTL, and records hosts the downloader
//! itself found unreachable.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::download::DownloadError;

/// Status string of a healthy host.
pub const OPERATIONAL: &str = "Operational";
/// Status recorded for hosts marked offline locally.
pub const NON_OPERATIONAL: &str = "Non-operational";
/// Status reported for hosts the status page does not list.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// Default status page location.
pub const DEFAULT_STATUS_PAGE: &str = "https://status.bunkr.ru/";

/// Timeout for fetching the status page.
pub const STATUS_PAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[allow(clippy::expect_used)]
static STATUS_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<div[^>]*class="flex items-center gap-4 py-4 border-b border-soft last:border-b-0"[^>]*>.*?<p[^>]*>(.*?)</p>.*?<span[^>]*>(.*?)</span>"#,
    )
    .expect("status row regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

/// Capitalized first host label of `download_link` (`cdn12.host.tld` -> `Cdn12`).
///
/// Unparseable links yield an empty string.
#[must_use]
pub fn subdomain_of(download_link: &str) -> String {
    let Ok(url) = Url::parse(download_link) else {
        return String::new();
    };
    let label = url
        .host_str()
        .and_then(|host| host.split('.').next())
        .unwrap_or_default();
    capitalize(label)
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// True when `status` describes a maintenance window.
#[must_use]
pub fn is_maintenance(status: &str) -> bool {
    status.to_lowercase().contains("maintenance")
}

/// Extracts `host -> status` pairs from the status page markup.
#[must_use]
pub fn parse_status_page(html: &str) -> HashMap<String, String> {
    STATUS_ROW
        .captures_iter(html)
        .filter_map(|caps| {
            let name = TAG.replace_all(caps.get(1)?.as_str(), "").trim().to_string();
            let status = TAG.replace_all(caps.get(2)?.as_str(), "").trim().to_string();
            (!name.is_empty()).then_some((name, status))
        })
        .collect()
}

/// Where host statuses come from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetches every known host status. An empty map means "unavailable".
    async fn fetch_all(&self) -> HashMap<String, String>;
}

/// [`StatusSource`] that scrapes the HTML status page.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusSource {
    /// Creates a source for the status page at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for a malformed URL and
    /// [`DownloadError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(url: &str, user_agent: &str) -> Result<Self, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(STATUS_PAGE_TIMEOUT)
            .build()
            .map_err(DownloadError::client_build)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_all(&self) -> HashMap<String, String> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "status page unreachable; continuing without host data");
                return HashMap::new();
            }
        };
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "status page returned an error");
            return HashMap::new();
        }
        match response.text().await {
            Ok(body) => {
                let statuses = parse_status_page(&body);
                debug!(hosts = statuses.len(), "status page parsed");
                statuses
            }
            Err(error) => {
                warn!(error = %error, "failed to read status page body");
                HashMap::new()
            }
        }
    }
}

/// Whether a status lookup reflects a fresh fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFreshness {
    /// Served from the snapshot without contacting the status page.
    Cached,
    /// Fetched from the status page during this call.
    Refreshed,
}

impl fmt::Display for StatusFreshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => f.write_str("cached"),
            Self::Refreshed => f.write_str("refreshed"),
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    fetched_at: Instant,
    statuses: HashMap<String, String>,
}

/// Shared host-status map with TTL-bounded refreshes.
///
/// The live map holds the latest known status per host, including hosts
/// marked offline locally. The snapshot holds the last successful page fetch
/// and decides whether a refresh may reuse it.
pub struct ServerStatusCache {
    source: Arc<dyn StatusSource>,
    live: DashMap<String, String>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl fmt::Debug for ServerStatusCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStatusCache")
            .field("hosts", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl ServerStatusCache {
    /// Creates an empty cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            live: DashMap::new(),
            snapshot: Mutex::new(None),
        }
    }

    /// Seeds the live map with an initial fetch. Returns the number of hosts found.
    ///
    /// The snapshot is left empty, so the first [`refresh`](Self::refresh)
    /// after a failure always fetches the page again.
    pub async fn prime(&self) -> usize {
        let statuses = self.source.fetch_all().await;
        let count = statuses.len();
        if count == 0 {
            warn!("status page returned no hosts; status checks start empty");
            return 0;
        }
        self.seed_live(&statuses);
        info!(hosts = count, "host status loaded");
        count
    }

    fn seed_live(&self, statuses: &HashMap<String, String>) {
        for (host, status) in statuses {
            self.live.insert(host.clone(), status.clone());
        }
    }

    fn store(&self, statuses: HashMap<String, String>, snapshot: &mut Option<Snapshot>) {
        self.seed_live(&statuses);
        *snapshot = Some(Snapshot {
            fetched_at: Instant::now(),
            statuses,
        });
    }

    /// Current status of `subdomain`, refreshing from the source if the
    /// snapshot is older than `ttl`.
    ///
    /// A failed refresh falls back to the live map (or [`UNKNOWN_STATUS`]) and
    /// reports [`StatusFreshness::Cached`]. Concurrent callers share a single
    /// in-flight refresh.
    #[instrument(skip(self))]
    pub async fn refresh(&self, subdomain: &str, ttl: Duration) -> (String, StatusFreshness) {
        let mut snapshot = self.snapshot.lock().await;

        if let Some(current) = snapshot.as_ref()
            && current.fetched_at.elapsed() < ttl
        {
            let status = current.statuses.get(subdomain).cloned();
            if let Some(status) = &status {
                self.live.insert(subdomain.to_string(), status.clone());
            }
            return (
                status.unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
                StatusFreshness::Cached,
            );
        }

        let fresh = self.source.fetch_all().await;
        if !fresh.is_empty() {
            let status = fresh
                .get(subdomain)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_STATUS.to_string());
            self.store(fresh, &mut snapshot);
            debug!(status = %status, "host status refreshed");
            return (status, StatusFreshness::Refreshed);
        }

        (
            self.status_of(subdomain)
                .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
            StatusFreshness::Cached,
        )
    }

    /// Live status of `subdomain`, if known.
    #[must_use]
    pub fn status_of(&self, subdomain: &str) -> Option<String> {
        self.live.get(subdomain).map(|entry| entry.value().clone())
    }

    /// Records the host serving `download_link` as offline and returns its name.
    pub fn mark_offline(&self, download_link: &str) -> String {
        let subdomain = subdomain_of(download_link);
        self.live
            .insert(subdomain.clone(), NON_OPERATIONAL.to_string());
        info!(subdomain = %subdomain, "host marked offline");
        subdomain
    }

    /// True when the host serving `download_link` is known and not operational.
    #[must_use]
    pub fn is_offline(&self, download_link: &str) -> bool {
        self.status_of(&subdomain_of(download_link))
            .is_some_and(|status| status != OPERATIONAL)
    }
}
