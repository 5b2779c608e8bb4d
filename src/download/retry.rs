//! Failure classification and backoff for a single file's attempt loop.
//!
//! # Overview
//!
//! Every failed attempt is handed to [`FailureClassifier::classify`], which
//! maps it onto a [`FailureKind`] and a [`RetryDecision`]:
//!
//! - no response / HTTP 521: consult the status page (unless disabled).
//!   Maintenance means a long backoff or a skip, per [`MaintenanceStrategy`].
//!   Operational means a short backoff. Anything else marks the host offline
//!   and gives up on the file.
//! - HTTP 429 / 503: short backoff.
//! - HTTP 502: maintenance check, otherwise one more immediate attempt with
//!   the budget shrunk so the next failure ends the loop.
//! - truncated stream / failed rename: short backoff.
//! - everything else: give up.
//!
//! Each classification emits exactly one event on the [`ProgressSink`], before
//! the caller sleeps.
//!
//! # Delays
//!
//! ```text
//! short:       3^(attempt+1) s + U(1, 3) s        (attempt is 0-based)
//! maintenance: [2, 5, 10][min(attempt, 2)] min + U(1, 10) s
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::error::{DownloadError, FailureKind};
use super::writer::IncompleteReason;
use crate::config::{DownloadConfig, MaintenanceStrategy};
use crate::progress::ProgressSink;
use crate::session_log::{SessionLog, maintenance_line};
use crate::status::{OPERATIONAL, ServerStatusCache, StatusFreshness, is_maintenance, subdomain_of};

/// Non-standard status some CDNs return when the origin is down.
pub const HTTP_SERVER_DOWN: u16 = 521;

const HTTP_BAD_GATEWAY: u16 = 502;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;
const HTTP_SERVICE_UNAVAILABLE: u16 = 503;

/// Maintenance waits in minutes, indexed by `min(attempt, 2)`.
const MAINTENANCE_DELAY_MINUTES: [u64; 3] = [2, 5, 10];

/// Largest exponent used for the short backoff.
const MAX_SHORT_BACKOFF_EXPONENT: u32 = 20;

/// Attempt counter and (shrinkable) budget for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    retries: u32,
}

impl RetryState {
    /// Starts at attempt 0 with `retries` attempts (at least one).
    #[must_use]
    pub fn new(retries: u32) -> Self {
        Self {
            attempt: 0,
            retries: retries.max(1),
        }
    }

    /// Zero-based index of the current attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current budget.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// True when a failure of the current attempt may still be retried.
    #[must_use]
    pub fn has_retry_left(&self) -> bool {
        self.attempt + 1 < self.retries
    }

    /// Moves to the next attempt.
    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    /// Shrinks the budget so the next classified failure ends the loop.
    pub fn force_final(&mut self) {
        self.retries = 1;
    }

    fn counter(&self) -> String {
        format!("({}/{})", self.attempt + 1, self.retries)
    }
}

/// Why a file's attempt loop ends without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonCause {
    /// The failure was retryable but the budget is spent.
    RetriesExhausted,
    /// Retrying would not help.
    NonRetryable,
}

/// What the attempt loop does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again without waiting.
    RetryNow,
    /// Wait, then try again.
    RetryAfter(Duration),
    /// Stop; the file is skipped rather than failed.
    Skip,
    /// Stop; the file is not downloaded.
    Abandon(AbandonCause),
}

/// Kind plus decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Failure taxonomy entry.
    pub kind: FailureKind,
    /// Next step.
    pub decision: RetryDecision,
}

impl Classification {
    fn new(kind: FailureKind, decision: RetryDecision) -> Self {
        Self { kind, decision }
    }
}

/// A failed attempt as seen by the classifier.
#[derive(Debug, Clone, Copy)]
pub enum AttemptFailure<'a> {
    /// The request failed before or instead of streaming.
    Request(&'a DownloadError),
    /// The stream ran but did not produce the final file.
    Incomplete(IncompleteReason),
}

enum Schedule {
    Short,
    Maintenance,
}

/// Short exponential backoff for the zero-based `attempt`.
#[must_use]
pub fn short_backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_add(1).min(MAX_SHORT_BACKOFF_EXPONENT);
    let base = Duration::from_secs(3u64.pow(exponent));
    let jitter = rand::thread_rng().gen_range(1.0..=3.0);
    base.saturating_add(Duration::from_secs_f64(jitter))
}

/// Long backoff used while a host is in maintenance.
#[must_use]
pub fn maintenance_backoff_delay(attempt: u32) -> Duration {
    let index = usize::try_from(attempt)
        .unwrap_or(usize::MAX)
        .min(MAINTENANCE_DELAY_MINUTES.len() - 1);
    let base = Duration::from_secs(MAINTENANCE_DELAY_MINUTES[index] * 60);
    let jitter = rand::thread_rng().gen_range(1.0..=10.0);
    base.saturating_add(Duration::from_secs_f64(jitter))
}

/// Maps attempt failures onto retry decisions.
pub struct FailureClassifier {
    status: Arc<ServerStatusCache>,
    session_log: Arc<dyn SessionLog>,
    sink: Arc<dyn ProgressSink>,
    status_checks: bool,
    cache_ttl: Duration,
    strategy: MaintenanceStrategy,
}

impl std::fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureClassifier")
            .field("status_checks", &self.status_checks)
            .field("cache_ttl", &self.cache_ttl)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl FailureClassifier {
    /// Builds a classifier over the shared run state.
    #[must_use]
    pub fn new(
        status: Arc<ServerStatusCache>,
        session_log: Arc<dyn SessionLog>,
        sink: Arc<dyn ProgressSink>,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            status,
            session_log,
            sink,
            status_checks: config.status_checks_enabled(),
            cache_ttl: config.status_cache_ttl,
            strategy: config.maintenance_strategy,
        }
    }

    /// Classifies a failed attempt of `filename` and decides what happens next.
    ///
    /// May shrink `state`'s budget (bad gateway). Never advances the attempt
    /// counter; the caller does that after acting on the decision.
    #[instrument(skip(self, failure, state), fields(attempt = state.attempt(), retries = state.retries()))]
    pub async fn classify(
        &self,
        download_link: &str,
        filename: &str,
        failure: AttemptFailure<'_>,
        state: &mut RetryState,
    ) -> Classification {
        let error = match failure {
            AttemptFailure::Incomplete(reason) => {
                return self.classify_incomplete(filename, reason, state);
            }
            AttemptFailure::Request(error) => error,
        };

        if error.is_connection_failure() || error.status() == Some(HTTP_SERVER_DOWN) {
            return self.server_down(download_link, filename, state).await;
        }

        match error.status() {
            Some(status @ (HTTP_TOO_MANY_REQUESTS | HTTP_SERVICE_UNAVAILABLE)) => {
                let kind = if status == HTTP_TOO_MANY_REQUESTS {
                    FailureKind::RateLimited
                } else {
                    FailureKind::ServiceUnavailable
                };
                self.retry_with_backoff(
                    kind,
                    state,
                    "Retrying download",
                    &format!("Server answered HTTP {status}."),
                    filename,
                    Schedule::Short,
                )
            }
            Some(HTTP_BAD_GATEWAY) => self.bad_gateway(download_link, filename, state).await,
            _ => {
                if let DownloadError::StreamInterrupted { .. } = error {
                    return self.classify_incomplete(
                        filename,
                        IncompleteReason::StreamTruncated,
                        state,
                    );
                }
                self.sink.log("Request error", &error.to_string());
                Classification::new(
                    FailureKind::Unclassified,
                    RetryDecision::Abandon(AbandonCause::NonRetryable),
                )
            }
        }
    }

    fn classify_incomplete(
        &self,
        filename: &str,
        reason: IncompleteReason,
        state: &RetryState,
    ) -> Classification {
        match reason {
            IncompleteReason::StreamTruncated => self.retry_with_backoff(
                FailureKind::StreamTruncated,
                state,
                "Retrying partial download",
                &format!("Transfer of {filename} ended early."),
                filename,
                Schedule::Short,
            ),
            IncompleteReason::LengthMismatch { expected, written } => self.retry_with_backoff(
                FailureKind::StreamTruncated,
                state,
                "Retrying partial download",
                &format!("Received {written} of {expected} bytes for {filename}."),
                filename,
                Schedule::Short,
            ),
            IncompleteReason::FinalizeFailed => self.retry_with_backoff(
                FailureKind::FinalizeFailure,
                state,
                "Retrying partial download",
                &format!("Could not move {filename} into place."),
                filename,
                Schedule::Short,
            ),
            IncompleteReason::Interrupted => {
                self.sink
                    .log("Download interrupted", &format!("Stopped {filename}."));
                Classification::new(
                    FailureKind::Unclassified,
                    RetryDecision::Abandon(AbandonCause::NonRetryable),
                )
            }
        }
    }

    async fn server_down(
        &self,
        download_link: &str,
        filename: &str,
        state: &RetryState,
    ) -> Classification {
        let subdomain = subdomain_of(download_link);

        if self.status_checks {
            let (status, freshness) = self.status.refresh(&subdomain, self.cache_ttl).await;
            debug!(subdomain = %subdomain, status = %status, %freshness, "host status checked");

            if is_maintenance(&status) {
                self.record_maintenance(&subdomain, &status, download_link)
                    .await;
                return self.maintenance(&subdomain, &status, freshness, filename, state);
            }

            if status == OPERATIONAL {
                return self.retry_with_backoff(
                    FailureKind::TransientNetwork,
                    state,
                    "Retrying transient failure",
                    &format!("{subdomain} reported operational ({freshness}) but the request failed."),
                    filename,
                    Schedule::Short,
                );
            }
        }

        let marked = self.status.mark_offline(download_link);
        self.sink.log(
            "No response",
            &format!("Subdomain {marked} has been marked as offline."),
        );
        Classification::new(
            FailureKind::ServerOffline,
            RetryDecision::Abandon(AbandonCause::NonRetryable),
        )
    }

    fn maintenance(
        &self,
        subdomain: &str,
        status: &str,
        freshness: StatusFreshness,
        filename: &str,
        state: &RetryState,
    ) -> Classification {
        match self.strategy {
            MaintenanceStrategy::Skip => {
                self.sink.log(
                    "Maintenance skip",
                    &format!(
                        "{subdomain} is under maintenance ({freshness}): {status}. \
                         Skipping {filename} (strategy: skip)."
                    ),
                );
                Classification::new(FailureKind::ServerMaintenance, RetryDecision::Skip)
            }
            MaintenanceStrategy::Backoff => self.retry_with_backoff(
                FailureKind::ServerMaintenance,
                state,
                "Waiting for maintenance",
                &format!("{subdomain} is under maintenance ({freshness}): {status}."),
                filename,
                Schedule::Maintenance,
            ),
        }
    }

    async fn bad_gateway(
        &self,
        download_link: &str,
        filename: &str,
        state: &mut RetryState,
    ) -> Classification {
        if self.status_checks {
            let subdomain = subdomain_of(download_link);
            let (status, freshness) = self.status.refresh(&subdomain, self.cache_ttl).await;
            if is_maintenance(&status) {
                self.record_maintenance(&subdomain, &status, download_link)
                    .await;
                return self.retry_with_backoff(
                    FailureKind::ServerMaintenance,
                    state,
                    "Waiting for maintenance",
                    &format!("{subdomain} maintenance ({freshness}) during bad gateway."),
                    filename,
                    Schedule::Maintenance,
                );
            }
        }

        self.sink
            .log("Server error", &format!("Bad gateway for {filename}."));
        if !state.has_retry_left() {
            return Classification::new(
                FailureKind::BadGateway,
                RetryDecision::Abandon(AbandonCause::RetriesExhausted),
            );
        }
        state.force_final();
        Classification::new(FailureKind::BadGateway, RetryDecision::RetryNow)
    }

    async fn record_maintenance(&self, subdomain: &str, status: &str, download_link: &str) {
        let line = maintenance_line(subdomain, status, download_link);
        if let Err(error) = self.session_log.append(&line).await {
            warn!(error = %error, "failed to write maintenance entry to session log");
        }
    }

    fn retry_with_backoff(
        &self,
        kind: FailureKind,
        state: &RetryState,
        event: &str,
        context: &str,
        filename: &str,
        schedule: Schedule,
    ) -> Classification {
        self.sink.log(
            event,
            &format!("{context} {event} for {filename} {}...", state.counter()),
        );

        if !state.has_retry_left() {
            debug!(kind = kind.label(), "retry budget exhausted");
            return Classification::new(kind, RetryDecision::Abandon(AbandonCause::RetriesExhausted));
        }

        let delay = match schedule {
            Schedule::Short => short_backoff_delay(state.attempt()),
            Schedule::Maintenance => maintenance_backoff_delay(state.attempt()),
        };
        debug!(kind = kind.label(), delay_ms = delay.as_millis(), "will retry");
        Classification::new(kind, RetryDecision::RetryAfter(delay))
    }
}
