//! Runtime settings for a download run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts per file on the first pass.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default number of attempts per file on the deferred pass.
pub const DEFAULT_DEFERRED_RETRIES: u32 = 1;

/// Default number of concurrent file downloads.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Upper bound on concurrent file downloads.
pub const MAX_WORKERS_LIMIT: usize = 100;

/// Default status snapshot lifetime.
pub const DEFAULT_STATUS_CACHE_TTL: Duration = Duration::from_secs(60);

/// What to do with a file whose host is in a maintenance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceStrategy {
    /// Keep retrying on the long maintenance schedule.
    #[default]
    Backoff,
    /// Give up on the file immediately without counting it as failed.
    Skip,
}

impl fmt::Display for MaintenanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backoff => f.write_str("backoff"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for MaintenanceStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "backoff" => Ok(Self::Backoff),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown maintenance strategy '{other}' (expected 'backoff' or 'skip')"
            )),
        }
    }
}

/// Result of checking a filename against [`FilterRules`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The file should be downloaded.
    Allowed,
    /// The name contains an ignored substring.
    Ignored,
    /// An include list is set and the name matches none of it.
    NotIncluded,
}

/// Substring filters applied to filenames before downloading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Only names containing one of these are downloaded (empty: no restriction).
    pub include: Vec<String>,
    /// Names containing any of these are skipped.
    pub ignore: Vec<String>,
}

impl FilterRules {
    /// Checks `filename`; the ignore list wins over the include list.
    #[must_use]
    pub fn evaluate(&self, filename: &str) -> FilterVerdict {
        if self.ignore.iter().any(|word| filename.contains(word.as_str())) {
            return FilterVerdict::Ignored;
        }
        if !self.include.is_empty()
            && !self.include.iter().any(|word| filename.contains(word.as_str()))
        {
            return FilterVerdict::NotIncluded;
        }
        FilterVerdict::Allowed
    }
}

/// Settings for the download core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Attempts per file on the first pass.
    pub retries: u32,
    /// Attempts per file on the deferred pass.
    pub deferred_retries: u32,
    /// Whether files that exhaust their retries get a second, final pass.
    pub deferred_pass: bool,
    /// Concurrent file downloads (`1..=100`).
    pub max_workers: usize,
    /// Consult the status page when a host looks down.
    pub status_check_on_failure: bool,
    /// Command-line opt-out that overrides `status_check_on_failure`.
    pub skip_status_check: bool,
    /// How long a status snapshot may be reused.
    pub status_cache_ttl: Duration,
    /// Maintenance handling.
    pub maintenance_strategy: MaintenanceStrategy,
    /// Filename filters.
    pub filters: FilterRules,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            deferred_retries: DEFAULT_DEFERRED_RETRIES,
            deferred_pass: true,
            max_workers: DEFAULT_MAX_WORKERS,
            status_check_on_failure: true,
            skip_status_check: false,
            status_cache_ttl: DEFAULT_STATUS_CACHE_TTL,
            maintenance_strategy: MaintenanceStrategy::Backoff,
            filters: FilterRules::default(),
        }
    }
}

impl DownloadConfig {
    /// True when failures may trigger a status page lookup.
    #[must_use]
    pub fn status_checks_enabled(&self) -> bool {
        self.status_check_on_failure && !self.skip_status_check
    }
}
