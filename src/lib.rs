//! Album Downloader Core Library
//!
//! This library moves lists of direct file links to disk: streaming each
//! file through a temporary file, reporting per-file progress, and deciding
//! after every failed attempt whether to retry, back off, wait out a host
//! maintenance window, or give up.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run settings, maintenance strategy and filename filters
//! - [`download`] - Transport, stream writer, failure classifier and engine
//! - [`progress`] - Progress sink seam between the core and its front end
//! - [`session_log`] - Append-only record of unreachable links and maintenance
//! - [`status`] - Host status page client and shared status cache
//! - [`user_agent`] - Default request identity

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod progress;
pub mod session_log;
pub mod status;
pub mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{DownloadConfig, FilterRules, MaintenanceStrategy};
pub use download::{
    ClientSettings, DownloadContext, DownloadEngine, DownloadError, DownloadItem, DownloadStats,
    EngineError, FailureKind, HttpClient, InterruptFlag, Transport,
};
pub use progress::{ProgressSink, TaskId, TaskUpdate, TracingProgress};
pub use session_log::{FileSessionLog, SessionLog};
pub use status::{HttpStatusSource, ServerStatusCache, StatusSource};
