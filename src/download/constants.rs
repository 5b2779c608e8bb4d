//! Constants for the download module (timeouts, chunk sizing, estimation).

use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for the streaming GET request (30 seconds between reads).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the best-effort HEAD probe used to discover a missing length.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Baseline used by the progress estimator when the total size is unknown (50 MiB).
pub const DEFAULT_UNKNOWN_SIZE_BASELINE: f64 = (50 * MIB) as f64;

/// Suffix appended to the final file name while a transfer is in flight.
pub const TEMP_SUFFIX: &str = "temp";

/// Chunk size used for anything at or above the largest tier (16 MiB).
pub const LARGE_FILE_CHUNK_SIZE: usize = 16 * MIB as usize;

/// Size tiers: files strictly smaller than the threshold use the paired chunk size.
pub const CHUNK_SIZE_TIERS: &[(u64, usize)] = &[
    (MIB, 32 * KIB as usize),
    (10 * MIB, 128 * KIB as usize),
    (50 * MIB, 512 * KIB as usize),
    (100 * MIB, MIB as usize),
    (250 * MIB, 2 * MIB as usize),
    (500 * MIB, 4 * MIB as usize),
    (GIB, 8 * MIB as usize),
];

/// Maximum on-disk filename length (characters, extension included).
pub const MAX_FILENAME_LEN: usize = 120;
