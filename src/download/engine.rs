//! Concurrent batch downloads with a deferred final pass.
//!
//! The engine runs every file of a batch through a [`FileDownloader`], at most
//! `max_workers` at a time. Files that spend their whole retry budget on the
//! first pass are deferred; once the first pass has drained, they get one
//! final pass with the (smaller) deferred budget.
//!
//! # Concurrency Model
//!
//! - Each file runs in its own Tokio task
//! - A semaphore permit is acquired before starting each file
//! - Permits are released automatically when a file finishes (RAII)
//! - An interrupt stops scheduling; running files stop at their next checkpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::context::DownloadContext;
use super::task::{DeferredDownload, DownloadReport, DownloadTask, FileDownloader, FileOutcome};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = crate::config::MAX_WORKERS_LIMIT;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// One file requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    /// Direct link to the file.
    pub download_link: String,
    /// Desired on-disk name.
    pub filename: String,
}

/// Statistics from a batch run.
///
/// Counters are updated from concurrent tasks. A file deferred on the first
/// pass is counted in `deferred` and again under its final-pass outcome.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    deferred: AtomicUsize,
    retried: AtomicUsize,
    interrupted: AtomicBool,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files now on disk.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Files skipped by rule (existing, filtered, maintenance skip).
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Files given up on.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Files pushed to the final pass.
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.deferred.load(Ordering::SeqCst)
    }

    /// Retries scheduled across all files.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// True if the run stopped early.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// True when nothing failed and the run was not interrupted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.was_interrupted()
    }

    fn record(&self, report: &DownloadReport) {
        self.retried
            .fetch_add(report.retries as usize, Ordering::SeqCst);
        match report.outcome {
            FileOutcome::Completed { .. } => self.increment(&self.completed),
            FileOutcome::Skipped(_) => self.increment(&self.skipped),
            FileOutcome::Deferred(_) => self.increment(&self.deferred),
            FileOutcome::Failed(_) => self.increment(&self.failed),
            FileOutcome::Interrupted => self.mark_interrupted(),
        }
    }

    #[allow(clippy::unused_self)]
    fn increment(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

/// Batch download engine.
#[derive(Debug)]
pub struct DownloadEngine {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    ctx: Arc<DownloadContext>,
    downloader: Arc<FileDownloader>,
}

impl DownloadEngine {
    /// Creates an engine over `ctx`, sized by `ctx.config.max_workers`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `max_workers` is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(ctx), fields(max_workers = ctx.config.max_workers))]
    pub fn new(ctx: DownloadContext) -> Result<Self, EngineError> {
        let concurrency = ctx.config.max_workers;
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            retries = ctx.config.retries,
            deferred_retries = ctx.config.deferred_retries,
            status_checks = ctx.config.status_checks_enabled(),
            "creating download engine"
        );

        let ctx = Arc::new(ctx);
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            downloader: Arc::new(FileDownloader::new(Arc::clone(&ctx))),
            ctx,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Downloads every item, then gives deferred items one final pass.
    ///
    /// Individual file failures do NOT cause this method to error; they are
    /// counted in the returned stats.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, items), fields(files = items.len(), dir = %self.ctx.download_dir.display()))]
    pub async fn download_all(&self, items: Vec<DownloadItem>) -> Result<DownloadStats, EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let config = &self.ctx.config;

        let tasks: Vec<DownloadTask> = items
            .into_iter()
            .map(|item| DownloadTask {
                task: self.ctx.sink.add_task(&item.filename),
                filename: item.filename,
                download_link: item.download_link,
            })
            .collect();

        info!(files = tasks.len(), "starting downloads");
        let deferred = self
            .run_pass(tasks, config.retries, !config.deferred_pass, &stats)
            .await?;

        if config.deferred_pass && !deferred.is_empty() && !self.ctx.interrupt.is_set() {
            info!(files = deferred.len(), "retrying deferred downloads");
            let tasks = deferred.into_iter().map(DownloadTask::from).collect();
            let leftover = self
                .run_pass(tasks, config.deferred_retries, true, &stats)
                .await?;
            debug_assert!(leftover.is_empty(), "final pass must not defer");
        }

        info!(
            completed = stats.completed(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            deferred = stats.deferred(),
            retried = stats.retried(),
            interrupted = stats.was_interrupted(),
            "downloads finished"
        );

        Ok(Arc::try_unwrap(stats).unwrap_or_else(|shared| {
            let copy = DownloadStats::new();
            for (target, source) in [
                (&copy.completed, &shared.completed),
                (&copy.skipped, &shared.skipped),
                (&copy.failed, &shared.failed),
                (&copy.deferred, &shared.deferred),
                (&copy.retried, &shared.retried),
            ] {
                target.store(source.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            copy.interrupted
                .store(shared.was_interrupted(), Ordering::SeqCst);
            copy
        }))
    }

    async fn run_pass(
        &self,
        tasks: Vec<DownloadTask>,
        retries: u32,
        final_pass: bool,
        stats: &Arc<DownloadStats>,
    ) -> Result<Vec<DeferredDownload>, EngineError> {
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            if self.ctx.interrupt.is_set() {
                info!("interrupted; not scheduling remaining files");
                stats.mark_interrupted();
                break;
            }

            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    permit.map_err(|_| EngineError::SemaphoreClosed)?
                }
                () = self.ctx.interrupt.wait() => {
                    stats.mark_interrupted();
                    break;
                }
            };

            let downloader = Arc::clone(&self.downloader);
            let stats = Arc::clone(stats);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let report = downloader.download(task, retries, final_pass).await;
                stats.record(&report);
                report
            }));
        }

        debug!(task_count = handles.len(), final_pass, "waiting for downloads to complete");

        let mut deferred = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(DownloadReport {
                    outcome: FileOutcome::Deferred(record),
                    ..
                }) => deferred.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "download task panicked");
                    stats.increment(&stats.failed);
                }
            }
        }
        Ok(deferred)
    }
}
