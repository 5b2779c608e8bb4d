//! Download core: streaming transfers, retry classification and batch scheduling.
//!
//! This module provides the pieces that move one file from a direct link to
//! disk and the engine that runs a batch of them concurrently.
//!
//! # Features
//!
//! - Streaming downloads into a `<name>.temp` file, renamed into place on success
//! - Chunk sizes tiered by file size
//! - Exact progress when the length is known; a background HEAD probe and a
//!   self-adjusting estimate when it is not
//! - Failure classification against a cached host status page, with backoff,
//!   maintenance handling and a deferred final pass
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use album_dl::config::DownloadConfig;
//! use album_dl::download::{DownloadContext, DownloadEngine, DownloadItem, HttpClient, InterruptFlag};
//! use album_dl::progress::TracingProgress;
//! use album_dl::session_log::FileSessionLog;
//! use album_dl::status::{HttpStatusSource, ServerStatusCache, DEFAULT_STATUS_PAGE};
//! use album_dl::user_agent::DEFAULT_USER_AGENT;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpStatusSource::new(DEFAULT_STATUS_PAGE, DEFAULT_USER_AGENT)?;
//! let ctx = DownloadContext {
//!     transport: Arc::new(HttpClient::new()?),
//!     status: Arc::new(ServerStatusCache::new(Arc::new(source))),
//!     session_log: Arc::new(FileSessionLog::fresh("session.log").await?),
//!     sink: Arc::new(TracingProgress::new()),
//!     config: DownloadConfig::default(),
//!     download_dir: "Downloads".into(),
//!     interrupt: Arc::new(InterruptFlag::new()),
//! };
//! let engine = DownloadEngine::new(ctx)?;
//! let stats = engine
//!     .download_all(vec![DownloadItem {
//!         download_link: "https://cdn1.example.com/clip.mp4".to_string(),
//!         filename: "clip.mp4".to_string(),
//!     }])
//!     .await?;
//! println!("completed: {}", stats.completed());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod context;
mod engine;
mod error;
mod estimator;
pub mod filename;
mod length;
mod retry;
mod task;
mod transport;
mod writer;

pub use client::{ClientSettings, HttpClient};
pub use context::{DownloadContext, InterruptFlag};
pub use engine::{DownloadEngine, DownloadItem, DownloadStats, EngineError};
pub use error::{DownloadError, FailureKind};
pub use estimator::{ESTIMATE_CEILING, ProgressEstimator};
pub use length::{
    LengthProbe, ProbePoll, ProbeTarget, normalize_length, probe_content_length,
    resolve_content_length, response_length,
};
pub use retry::{
    AbandonCause, AttemptFailure, Classification, FailureClassifier, HTTP_SERVER_DOWN,
    RetryDecision, RetryState, maintenance_backoff_delay, short_backoff_delay,
};
pub use task::{
    DeferredDownload, DownloadReport, DownloadTask, FileDownloader, FileOutcome, SkipReason,
};
pub use transport::{ByteStream, HttpResponse, Transport};
pub use writer::{
    IncompleteReason, PROGRESS_EVENT, WriteOutcome, chunk_size_for, save_with_progress,
    temp_path_for,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
