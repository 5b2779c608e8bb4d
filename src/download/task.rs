//! Single-file orchestration: pre-checks, the attempt loop, and outcomes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::context::DownloadContext;
use super::error::{DownloadError, FailureKind};
use super::filename::truncate_filename;
use super::length::ProbeTarget;
use super::retry::{
    AbandonCause, AttemptFailure, Classification, FailureClassifier, RetryDecision, RetryState,
};
use super::writer::{IncompleteReason, WriteOutcome, save_with_progress};
use crate::config::FilterVerdict;
use crate::progress::{TaskId, TaskUpdate};

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Progress row for this file.
    pub task: TaskId,
    /// Desired on-disk name (truncated before use).
    pub filename: String,
    /// Direct link to the file.
    pub download_link: String,
}

/// A file held back for the final pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredDownload {
    /// Progress row, reused on the final pass.
    pub task: TaskId,
    /// Desired on-disk name.
    pub filename: String,
    /// Direct link to the file.
    pub download_link: String,
}

impl From<DeferredDownload> for DownloadTask {
    fn from(deferred: DeferredDownload) -> Self {
        Self {
            task: deferred.task,
            filename: deferred.filename,
            download_link: deferred.download_link,
        }
    }
}

impl From<&DownloadTask> for DeferredDownload {
    fn from(task: &DownloadTask) -> Self {
        Self {
            task: task.task,
            filename: task.filename.clone(),
            download_link: task.download_link.clone(),
        }
    }
}

/// Why a file was not downloaded without counting as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The final file already exists.
    AlreadyDownloaded,
    /// The name matches the ignore list.
    Ignored,
    /// The name matches none of the include list.
    NotIncluded,
    /// The host is in maintenance and the strategy is `skip`.
    Maintenance,
}

/// Terminal result for one file on one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file is in place.
    Completed {
        /// Final location.
        path: PathBuf,
        /// Size in bytes.
        bytes: u64,
    },
    /// Nothing was downloaded, by rule.
    Skipped(SkipReason),
    /// Budget spent on a non-final pass; try once more later.
    Deferred(DeferredDownload),
    /// The file is given up on.
    Failed(FailureKind),
    /// The run was interrupted.
    Interrupted,
}

/// Outcome plus attempt bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Terminal outcome.
    pub outcome: FileOutcome,
    /// GET requests issued.
    pub attempts: u32,
    /// Retries scheduled (immediate or delayed).
    pub retries: u32,
    /// Backoff waits, in order.
    pub delays: Vec<Duration>,
}

impl DownloadReport {
    fn new() -> Self {
        Self {
            outcome: FileOutcome::Interrupted,
            attempts: 0,
            retries: 0,
            delays: Vec::new(),
        }
    }

    fn finish(mut self, outcome: FileOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Downloads one file at a time against the shared run context.
#[derive(Debug)]
pub struct FileDownloader {
    ctx: Arc<DownloadContext>,
    classifier: FailureClassifier,
}

impl FileDownloader {
    /// Creates a downloader over `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<DownloadContext>) -> Self {
        let classifier = FailureClassifier::new(
            ctx.status.clone(),
            ctx.session_log.clone(),
            ctx.sink.clone(),
            &ctx.config,
        );
        Self { ctx, classifier }
    }

    /// Runs `task` with a budget of `retries` attempts.
    ///
    /// On the final pass an already-offline host is refused up front and an
    /// exhausted budget fails the file; otherwise it is deferred.
    #[instrument(skip(self, task), fields(file = %task.filename))]
    pub async fn download(&self, task: DownloadTask, retries: u32, final_pass: bool) -> DownloadReport {
        let report = DownloadReport::new();

        if final_pass && self.ctx.status.is_offline(&task.download_link) {
            self.ctx.sink.log(
                "Non-operational subdomain",
                &format!(
                    "The subdomain for {} is offline. Check the log file.",
                    task.filename
                ),
            );
            self.record_unreachable(&task.download_link).await;
            self.ctx.sink.update_task(task.task, TaskUpdate::hidden());
            return report.finish(FileOutcome::Failed(FailureKind::ServerOffline));
        }

        let final_path = self.ctx.download_dir.join(truncate_filename(&task.filename));
        if let Some(reason) = self.skip_reason(&task, &final_path) {
            return report.finish(FileOutcome::Skipped(reason));
        }

        self.attempt_loop(task, &final_path, retries, final_pass, report)
            .await
    }

    fn skip_reason(&self, task: &DownloadTask, final_path: &Path) -> Option<SkipReason> {
        let (reason, details) = if final_path.exists() {
            (
                SkipReason::AlreadyDownloaded,
                format!("{} has already been downloaded.", task.filename),
            )
        } else {
            match self.ctx.config.filters.evaluate(&task.filename) {
                FilterVerdict::Allowed => return None,
                FilterVerdict::Ignored => (
                    SkipReason::Ignored,
                    format!("{} matches the ignore list.", task.filename),
                ),
                FilterVerdict::NotIncluded => (
                    SkipReason::NotIncluded,
                    format!("No included words found for {}.", task.filename),
                ),
            }
        };

        debug!(?reason, "skipping file");
        self.ctx.sink.log("Skipped download", &details);
        self.ctx
            .sink
            .update_task(task.task, TaskUpdate::finished_hidden());
        Some(reason)
    }

    async fn attempt_loop(
        &self,
        task: DownloadTask,
        final_path: &Path,
        retries: u32,
        final_pass: bool,
        mut report: DownloadReport,
    ) -> DownloadReport {
        let mut state = RetryState::new(retries);
        let attempt_limit = state.retries();
        let mut last_kind = FailureKind::Unclassified;

        while state.attempt() < attempt_limit {
            if self.ctx.interrupt.is_set() {
                return report.finish(FileOutcome::Interrupted);
            }

            report.attempts += 1;
            let classification = match self.attempt(&task, final_path).await {
                Ok(WriteOutcome::Completed { bytes }) => {
                    info!(bytes, attempts = report.attempts, "file downloaded");
                    return report.finish(FileOutcome::Completed {
                        path: final_path.to_path_buf(),
                        bytes,
                    });
                }
                Ok(WriteOutcome::NeedsRetry(IncompleteReason::Interrupted)) => {
                    return report.finish(FileOutcome::Interrupted);
                }
                Ok(WriteOutcome::NeedsRetry(reason)) => {
                    self.classify(&task, AttemptFailure::Incomplete(reason), &mut state)
                        .await
                }
                Err(error) => {
                    debug!(error = %error, "attempt failed");
                    self.classify(&task, AttemptFailure::Request(&error), &mut state)
                        .await
                }
            };
            last_kind = classification.kind;

            match classification.decision {
                RetryDecision::RetryNow => report.retries += 1,
                RetryDecision::RetryAfter(delay) => {
                    report.retries += 1;
                    report.delays.push(delay);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.ctx.interrupt.wait() => {
                            return report.finish(FileOutcome::Interrupted);
                        }
                    }
                }
                RetryDecision::Skip => {
                    self.ctx.sink.update_task(task.task, TaskUpdate::hidden());
                    return report.finish(FileOutcome::Skipped(SkipReason::Maintenance));
                }
                RetryDecision::Abandon(AbandonCause::NonRetryable) => {
                    if classification.kind == FailureKind::ServerOffline {
                        self.record_unreachable(&task.download_link).await;
                    }
                    self.ctx.sink.update_task(task.task, TaskUpdate::hidden());
                    return report.finish(FileOutcome::Failed(classification.kind));
                }
                RetryDecision::Abandon(AbandonCause::RetriesExhausted) => break,
            }

            state.advance();
        }

        let outcome = self.exhausted(&task, final_pass, last_kind);
        report.finish(outcome)
    }

    async fn attempt(
        &self,
        task: &DownloadTask,
        final_path: &Path,
    ) -> Result<WriteOutcome, DownloadError> {
        let response = self.ctx.transport.get(&task.download_link).await?;
        let probe = ProbeTarget {
            transport: self.ctx.transport.clone(),
            url: task.download_link.clone(),
        };
        save_with_progress(
            response,
            final_path,
            self.ctx.sink.as_ref(),
            task.task,
            Some(probe),
            self.ctx.interrupt.as_atomic(),
        )
        .await
    }

    async fn classify(
        &self,
        task: &DownloadTask,
        failure: AttemptFailure<'_>,
        state: &mut RetryState,
    ) -> Classification {
        self.classifier
            .classify(&task.download_link, &task.filename, failure, state)
            .await
    }

    fn exhausted(&self, task: &DownloadTask, final_pass: bool, kind: FailureKind) -> FileOutcome {
        if final_pass {
            warn!(kind = kind.label(), "giving up on file");
            self.ctx.sink.log(
                "Download failed",
                &format!("Failed to download {}. Check the log file.", task.filename),
            );
            self.ctx.sink.update_task(task.task, TaskUpdate::hidden());
            return FileOutcome::Failed(kind);
        }

        self.ctx.sink.log(
            "Exceeded retry attempts",
            &format!(
                "Max retries reached for {}. It will be retried one more time after all other tasks.",
                task.filename
            ),
        );
        FileOutcome::Deferred(DeferredDownload::from(task))
    }

    async fn record_unreachable(&self, download_link: &str) {
        if let Err(error) = self.ctx.session_log.append(download_link).await {
            warn!(error = %error, "failed to write session log entry");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{DownloadConfig, FilterRules, MaintenanceStrategy};
    use crate::progress::ProgressSink;
    use crate::test_support::TestRun;
    use crate::test_support::fake_transport::{FakeBody, FakeTransport, Scripted};

    const LINK: &str = "https://cdn1.example.com/media/clip.mp4";

    fn task_for(run: &TestRun, filename: &str) -> DownloadTask {
        DownloadTask {
            task: run.sink.add_task(filename),
            filename: filename.to_string(),
            download_link: LINK.to_string(),
        }
    }

    fn ok_body(len: usize) -> Scripted {
        Scripted::Body(FakeBody::new(vec![vec![b'x'; len]]).with_content_length(&len.to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_three_times_then_success() {
        let transport = FakeTransport::new().with_script(vec![
            Scripted::Status(429),
            Scripted::Status(429),
            Scripted::Status(429),
            ok_body(10),
        ]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 4, false).await;

        assert!(matches!(report.outcome, FileOutcome::Completed { bytes: 10, .. }));
        assert_eq!(report.attempts, 4);
        assert_eq!(report.delays.len(), 3);
        assert!(report.delays.windows(2).all(|w| w[0] < w[1]));
        assert!(report.delays[0] >= Duration::from_secs(4));
        assert_eq!(run.transport.get_calls(), 4);
        assert!(run.dir.path().join("clip.mp4").exists());
        assert_eq!(run.sink.completed_history(task.task).last().copied(), Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_skip_stops_after_one_attempt() {
        let transport = FakeTransport::new().with_script(vec![Scripted::ConnectionFailure]);
        let config = DownloadConfig {
            maintenance_strategy: MaintenanceStrategy::Skip,
            ..DownloadConfig::default()
        };
        let run = TestRun::new(transport, &[("Cdn1", "Maintenance")], config);
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 5, false).await;

        assert_eq!(report.outcome, FileOutcome::Skipped(SkipReason::Maintenance));
        assert_eq!(run.transport.get_calls(), 1);
        assert!(report.delays.is_empty());
        let lines = run.session_log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("MAINTENANCE Cdn1"));
        assert_eq!(run.sink.visibility(task.task), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_gateway_then_failure_abandons_early() {
        let transport = FakeTransport::new()
            .with_script(vec![Scripted::Status(502), Scripted::Status(429), ok_body(4)]);
        let run = TestRun::new(transport, &[("Cdn1", "Operational")], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 5, false).await;

        assert_eq!(run.transport.get_calls(), 2);
        assert!(report.delays.is_empty());
        match report.outcome {
            FileOutcome::Deferred(deferred) => {
                assert_eq!(deferred.download_link, LINK);
                assert_eq!(deferred.task, task.task);
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(run.sink.count_event("Exceeded retry attempts"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_on_final_pass_fails_and_hides() {
        let transport = FakeTransport::new().with_script(vec![Scripted::Status(503)]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 2, true).await;

        assert_eq!(report.outcome, FileOutcome::Failed(FailureKind::ServiceUnavailable));
        assert_eq!(run.transport.get_calls(), 2);
        assert_eq!(report.delays.len(), 1);
        assert_eq!(run.sink.count_event("Download failed"), 1);
        assert_eq!(run.sink.visibility(task.task), Some(false));
    }

    #[tokio::test]
    async fn test_offline_host_is_abandoned_and_logged() {
        let transport = FakeTransport::new().with_script(vec![Scripted::Status(521)]);
        let run = TestRun::new(transport, &[("Cdn1", "Down")], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 5, false).await;

        assert_eq!(report.outcome, FileOutcome::Failed(FailureKind::ServerOffline));
        assert_eq!(run.transport.get_calls(), 1);
        assert_eq!(run.session_log.lines(), vec![LINK.to_string()]);
        assert_eq!(run.sink.visibility(task.task), Some(false));
    }

    #[tokio::test]
    async fn test_final_pass_refuses_offline_host_up_front() {
        let transport = FakeTransport::new().with_script(vec![ok_body(4)]);
        let run = TestRun::new(transport, &[("Cdn1", "Down")], DownloadConfig::default());
        run.ctx.status.prime().await;
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 1, true).await;

        assert_eq!(report.outcome, FileOutcome::Failed(FailureKind::ServerOffline));
        assert_eq!(run.transport.get_calls(), 0);
        assert_eq!(run.sink.count_event("Non-operational subdomain"), 1);
        assert_eq!(run.session_log.lines(), vec![LINK.to_string()]);
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let transport = FakeTransport::new().with_script(vec![ok_body(4)]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        std::fs::write(run.dir.path().join("clip.mp4"), b"done").unwrap();
        let downloader = FileDownloader::new(run.ctx.clone());
        let task = task_for(&run, "clip.mp4");

        let report = downloader.download(task.clone(), 5, false).await;

        assert_eq!(report.outcome, FileOutcome::Skipped(SkipReason::AlreadyDownloaded));
        assert_eq!(run.transport.get_calls(), 0);
        assert_eq!(run.sink.completed_history(task.task), vec![100.0]);
        assert_eq!(run.sink.visibility(task.task), Some(false));
        assert!(run.sink.events()[0].1.contains("has already been downloaded"));
    }

    #[tokio::test]
    async fn test_filters_skip_files() {
        let config = DownloadConfig {
            filters: FilterRules {
                include: vec!["clip".to_string()],
                ignore: vec!["preview".to_string()],
            },
            ..DownloadConfig::default()
        };
        let run = TestRun::new(FakeTransport::new(), &[], config);
        let downloader = FileDownloader::new(run.ctx.clone());

        let ignored = downloader
            .download(task_for(&run, "clip-preview.mp4"), 5, false)
            .await;
        let excluded = downloader.download(task_for(&run, "photo.jpg"), 5, false).await;

        assert_eq!(ignored.outcome, FileOutcome::Skipped(SkipReason::Ignored));
        assert_eq!(excluded.outcome, FileOutcome::Skipped(SkipReason::NotIncluded));
        assert_eq!(run.transport.get_calls(), 0);
        assert_eq!(run.sink.count_event("Skipped download"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_stream_is_retried() {
        let transport = FakeTransport::new().with_script(vec![
            Scripted::Body(
                FakeBody::new(vec![b"abc".to_vec(), b"def".to_vec()])
                    .with_content_length("6")
                    .truncated_after(1),
            ),
            Scripted::Body(
                FakeBody::new(vec![b"abc".to_vec(), b"def".to_vec()]).with_content_length("6"),
            ),
        ]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());

        let report = downloader.download(task_for(&run, "clip.mp4"), 5, false).await;

        assert!(matches!(report.outcome, FileOutcome::Completed { bytes: 6, .. }));
        assert_eq!(report.delays.len(), 1);
        assert_eq!(
            std::fs::read(run.dir.path().join("clip.mp4")).unwrap(),
            b"abcdef"
        );
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = FakeTransport::new().with_script(vec![Scripted::Status(404)]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());

        let report = downloader.download(task_for(&run, "clip.mp4"), 5, false).await;

        assert_eq!(report.outcome, FileOutcome::Failed(FailureKind::Unclassified));
        assert_eq!(run.transport.get_calls(), 1);
        assert!(run.session_log.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_backoff() {
        let transport = FakeTransport::new().with_script(vec![Scripted::Status(429)]);
        let run = TestRun::new(transport, &[], DownloadConfig::default());
        let downloader = FileDownloader::new(run.ctx.clone());
        let interrupt = run.ctx.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            interrupt.trigger();
        });

        let report = downloader.download(task_for(&run, "clip.mp4"), 5, false).await;

        assert_eq!(report.outcome, FileOutcome::Interrupted);
        assert_eq!(run.transport.get_calls(), 1);
    }

    #[test]
    fn test_deferred_record_serializes() {
        let deferred = DeferredDownload {
            task: TaskId(3),
            filename: "clip.mp4".to_string(),
            download_link: LINK.to_string(),
        };
        let json = serde_json::to_value(&deferred).unwrap();
        assert_eq!(json["filename"], "clip.mp4");
        assert_eq!(json["download_link"], LINK);
        assert_eq!(json["task"], 3);
        let task: DownloadTask = deferred.into();
        assert_eq!(task.task, TaskId(3));
    }
}
