//! Default request identity for download and status-page traffic.
//!
//! File hosts reject obvious non-browser clients, so downloads go out with a
//! desktop browser User-Agent and a Referer pointing at the host's landing page.

use reqwest::header::{CONNECTION, HeaderMap, HeaderValue, REFERER};
use tracing::warn;

/// Desktop Firefox User-Agent sent with every download request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:136.0) Gecko/20100101 Firefox/136.0";

/// Referer sent with every download request.
pub const DEFAULT_REFERER: &str = "https://get.bunkrr.su/";

/// Default User-Agent for download requests.
#[must_use]
pub fn default_download_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Headers attached to every download request besides the User-Agent.
///
/// An unusable referer value is dropped with a warning.
#[must_use]
pub(crate) fn default_headers(referer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(referer) = referer.filter(|r| !r.trim().is_empty()) {
        match HeaderValue::from_str(referer) {
            Ok(value) => {
                headers.insert(REFERER, value);
            }
            Err(_) => warn!(referer, "ignoring invalid referer header value"),
        }
    }
    headers
}
