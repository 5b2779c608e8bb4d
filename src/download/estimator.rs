//! Progress estimation for streams of unknown length.

use super::constants::DEFAULT_UNKNOWN_SIZE_BASELINE;

/// Highest percentage the estimator will ever report.
///
/// 100% is reserved for a confirmed finalize by the stream writer.
pub const ESTIMATE_CEILING: f64 = 99.0;

/// Running completion estimate for a download whose size is unknown.
///
/// Each update takes the maximum of a linear guess against `baseline` and a
/// logarithmic curve (`log10(bytes + 1) * 20`), never dropping below the
/// previous estimate and never exceeding [`ESTIMATE_CEILING`]. Small transfers
/// move along the log curve; large ones along the linear guess.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    baseline: f64,
    estimate: f64,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_SIZE_BASELINE)
    }
}

impl ProgressEstimator {
    /// Creates an estimator; non-positive baselines fall back to 50 MiB.
    #[must_use]
    pub fn new(baseline: f64) -> Self {
        let baseline = if baseline > 0.0 {
            baseline
        } else {
            DEFAULT_UNKNOWN_SIZE_BASELINE
        };
        Self {
            baseline,
            estimate: 0.0,
        }
    }

    /// Returns the next completion percentage for `downloaded_bytes` so far.
    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, downloaded_bytes: u64) -> f64 {
        if downloaded_bytes == 0 {
            return self.estimate;
        }

        let bytes = downloaded_bytes as f64;
        let linear = bytes / self.baseline * 100.0;
        let log_scaled = (bytes + 1.0).log10() * 20.0;
        self.estimate = self
            .estimate
            .max(linear)
            .max(log_scaled)
            .min(ESTIMATE_CEILING);
        self.estimate
    }

    /// Current estimate without updating.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    /// Baseline in bytes.
    #[must_use]
    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}
