//! Transfer deadline derived from the expected file size

/// Deadline floor, also the fixed allowance added on top of the size-based part
pub const MIN_TIMEOUT_SECS: u64 = 300;
/// Deadline ceiling
pub const MAX_TIMEOUT_SECS: u64 = 3 * 3600;
/// Assumed sustained throughput in bytes per second
pub const ASSUMED_THROUGHPUT: u64 = 500_000;

/// Seconds a transfer of `filesize` bytes is allowed to take
#[must_use]
pub fn estimate(filesize: u64) -> u64 {
    (MIN_TIMEOUT_SECS + filesize / ASSUMED_THROUGHPUT).clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}

#[must_use]
pub fn estimate_duration(filesize: u64) -> std::time::Duration {
    std::time::Duration::from_secs(estimate(filesize))
}
