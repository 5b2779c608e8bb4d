//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use album_dl::config::{
    DEFAULT_MAX_WORKERS, DEFAULT_RETRIES, DownloadConfig, FilterRules, MAX_WORKERS_LIMIT,
    MaintenanceStrategy,
};
use album_dl::session_log::DEFAULT_SESSION_LOG;
use album_dl::status::DEFAULT_STATUS_PAGE;
use album_dl::user_agent::{DEFAULT_REFERER, DEFAULT_USER_AGENT};
use clap::Parser;
use clap::builder::TypedValueParser;

/// Default download directory, relative to the working directory.
pub const DEFAULT_DOWNLOAD_DIR: &str = "Downloads";

/// Download files from direct links with live progress and server-aware retries.
///
/// Links are taken from the command line, or one per line from stdin.
#[derive(Parser, Debug)]
#[command(name = "album-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Direct download links
    pub links: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory to save files into
    #[arg(short = 'p', long = "custom-path", default_value = DEFAULT_DOWNLOAD_DIR)]
    pub custom_path: PathBuf,

    /// Maximum concurrent downloads (1-100)
    #[arg(
        short = 'w',
        long,
        default_value_t = DEFAULT_MAX_WORKERS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_WORKERS_LIMIT as u64).map(|v| usize::try_from(v).unwrap_or(MAX_WORKERS_LIMIT))
    )]
    pub max_workers: usize,

    /// Attempts per file before it is deferred (1-20)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRIES, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retries: u32,

    /// Skip files whose names contain any of these words
    #[arg(short = 'i', long, num_args = 1..)]
    pub ignore: Vec<String>,

    /// Only download files whose names contain one of these words
    #[arg(short = 'n', long, num_args = 1..)]
    pub include: Vec<String>,

    /// Never consult the status page after a failure
    #[arg(long)]
    pub skip_status_check: bool,

    /// Consult the status page when a host looks down ("true" enables)
    #[arg(
        long,
        env = "STATUS_CHECK_ON_FAILURE",
        default_value = "true",
        action = clap::ArgAction::Set,
        value_parser = parse_env_bool
    )]
    pub status_check_on_failure: bool,

    /// Seconds a status page snapshot may be reused
    #[arg(long = "status-cache-ttl", env = "STATUS_CACHE_TTL_SECONDS", default_value_t = 60)]
    pub status_cache_ttl: u64,

    /// What to do when a host is in maintenance: backoff or skip
    #[arg(long, env = "MAINTENANCE_RETRY_STRATEGY", default_value_t = MaintenanceStrategy::Backoff)]
    pub maintenance_strategy: MaintenanceStrategy,

    /// Status page listing host health
    #[arg(long, env = "STATUS_PAGE_URL", default_value = DEFAULT_STATUS_PAGE)]
    pub status_page: String,

    /// User-Agent header for downloads
    #[arg(long, env = "DOWNLOAD_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Referer header for downloads
    #[arg(long = "download-referer", env = "DOWNLOAD_REFERER", default_value = DEFAULT_REFERER)]
    pub download_referer: String,

    /// Session log recording unreachable links and maintenance sightings
    #[arg(long, env = "SESSION_LOG_PATH", default_value = DEFAULT_SESSION_LOG)]
    pub session_log: PathBuf,

    /// Plain log output instead of progress bars
    #[arg(long)]
    pub disable_ui: bool,
}

/// Only a case-insensitive "true" enables the flag.
fn parse_env_bool(value: &str) -> Result<bool, String> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

impl Args {
    /// Builds the download core settings from the parsed flags.
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            retries: self.retries,
            max_workers: self.max_workers,
            status_check_on_failure: self.status_check_on_failure,
            skip_status_check: self.skip_status_check,
            status_cache_ttl: std::time::Duration::from_secs(self.status_cache_ttl),
            maintenance_strategy: self.maintenance_strategy,
            filters: FilterRules {
                include: self.include.clone(),
                ignore: self.ignore.clone(),
            },
            ..DownloadConfig::default()
        }
    }
}
