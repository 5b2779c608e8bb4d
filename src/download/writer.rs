//! Streams a response body to a temporary file and finalizes it.
//!
//! Bytes land in `<final-name>.temp` and are only renamed onto the final name
//! once the transfer is known to be complete. A truncated stream or a length
//! mismatch leaves the temporary file behind and asks the caller to retry.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::constants::{CHUNK_SIZE_TIERS, LARGE_FILE_CHUNK_SIZE, TEMP_SUFFIX};
use super::error::DownloadError;
use super::estimator::ProgressEstimator;
use super::length::{ProbePoll, ProbeTarget, resolve_content_length};
use super::transport::HttpResponse;
use crate::progress::{ProgressSink, TaskId, TaskUpdate};

/// Event name used for stream-level notices.
pub const PROGRESS_EVENT: &str = "Download progress";

/// Notice emitted once per stream when no length could be determined up front.
pub const UNKNOWN_LENGTH_NOTICE: &str =
    "Server did not provide a content length. Progress will be estimated.";

/// Why a transfer needs another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// The body stream broke off mid-transfer.
    StreamTruncated,
    /// The byte count did not match the declared length.
    LengthMismatch {
        /// Declared length.
        expected: u64,
        /// Bytes actually written.
        written: u64,
    },
    /// The temporary file could not be renamed onto the final name.
    FinalizeFailed,
    /// The run was interrupted while streaming.
    Interrupted,
}

/// Result of one streaming pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The final file exists and holds `bytes` bytes.
    Completed {
        /// Bytes written.
        bytes: u64,
    },
    /// The final file does not exist; the caller may retry.
    NeedsRetry(IncompleteReason),
}

/// Chunk size for a resource of `file_size` bytes (0 when unknown).
#[must_use]
pub fn chunk_size_for(file_size: u64) -> usize {
    CHUNK_SIZE_TIERS
        .iter()
        .find(|(threshold, _)| file_size < *threshold)
        .map_or(LARGE_FILE_CHUNK_SIZE, |(_, size)| *size)
}

/// Temporary path for `final_path`: the final name with `.temp` appended.
#[must_use]
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

#[allow(clippy::cast_precision_loss)]
fn exact_percentage(written: u64, total: u64) -> f64 {
    (written as f64 / total as f64 * 100.0).min(100.0)
}

/// Writes `response` to disk while reporting progress for `task`.
///
/// With a known length, progress is exact and the file is finalized only if
/// the written byte count matches it. With an unknown length, progress is
/// estimated (capped at 99%) until a background probe supplies a length or
/// the stream ends, and finalization is attempted whenever the stream ends
/// cleanly. 100% is reported only after a successful rename.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the temporary file cannot be created or
/// written. Interruptions and mismatches are reported through
/// [`WriteOutcome::NeedsRetry`] instead.
#[instrument(skip(response, sink, probe, interrupted), fields(path = %final_path.display()))]
pub async fn save_with_progress(
    response: HttpResponse,
    final_path: &Path,
    sink: &dyn ProgressSink,
    task: TaskId,
    probe: Option<ProbeTarget>,
    interrupted: &AtomicBool,
) -> Result<WriteOutcome, DownloadError> {
    let (mut file_size, mut probe) = resolve_content_length(&response, probe);
    let mut estimator = if file_size.is_none() {
        sink.log(PROGRESS_EVENT, UNKNOWN_LENGTH_NOTICE);
        Some(ProgressEstimator::default())
    } else {
        None
    };

    let chunk_size = chunk_size_for(file_size.unwrap_or(0));
    let temp_path = temp_path_for(final_path);
    debug!(chunk_size, ?file_size, temp = %temp_path.display(), "streaming to temp file");

    let file = File::create(&temp_path)
        .await
        .map_err(|e| DownloadError::io(&temp_path, e))?;
    let mut writer = BufWriter::with_capacity(chunk_size, file);
    let mut body = response.into_body();
    let mut written: u64 = 0;
    let mut stopped: Option<IncompleteReason> = None;

    'stream: while let Some(next) = body.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(error = %error, written, "stream ended early");
                stopped = Some(IncompleteReason::StreamTruncated);
                break;
            }
        };

        for piece in chunk.chunks(chunk_size) {
            if interrupted.load(Ordering::SeqCst) {
                stopped = Some(IncompleteReason::Interrupted);
                break 'stream;
            }

            writer
                .write_all(piece)
                .await
                .map_err(|e| DownloadError::io(&temp_path, e))?;
            written += piece.len() as u64;

            if let Some(total) = file_size {
                sink.update_task(task, TaskUpdate::completed(exact_percentage(written, total)));
                continue;
            }

            if let Some(active) = probe.as_mut()
                && let ProbePoll::Ready(result) = active.poll()
            {
                probe = None;
                if let Some(total) = result {
                    debug!(total, written, "length probe resolved, switching to exact progress");
                    file_size = Some(total);
                    estimator = None;
                    sink.update_task(task, TaskUpdate::completed(exact_percentage(written, total)));
                    continue;
                }
            }

            if let Some(estimator) = estimator.as_mut() {
                sink.update_task(task, TaskUpdate::completed(estimator.update(written)));
            }
        }
    }
    drop(probe);

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(&temp_path, e))?;
    drop(writer);

    if let Some(reason) = stopped {
        return Ok(WriteOutcome::NeedsRetry(reason));
    }

    if let Some(expected) = file_size
        && written != expected
    {
        warn!(expected, written, "byte count does not match declared length");
        return Ok(WriteOutcome::NeedsRetry(IncompleteReason::LengthMismatch {
            expected,
            written,
        }));
    }

    if let Err(error) = tokio::fs::rename(&temp_path, final_path).await {
        warn!(error = %error, "could not move temp file into place");
        return Ok(WriteOutcome::NeedsRetry(IncompleteReason::FinalizeFailed));
    }

    sink.update_task(task, TaskUpdate::completed(100.0));
    info!(bytes = written, "download finalized");
    Ok(WriteOutcome::Completed { bytes: written })
}
