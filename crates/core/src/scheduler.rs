//! Sync cadence constants and backoff helper.

/// Minimum interval between timer-driven sync cycles.
pub const SYNC_MIN_INTERVAL_SECS: u64 = 60;

/// Consecutive-failure ceiling; at the ceiling cycles only probe connectivity.
pub const SYNC_FAILURE_CEILING: u32 = 5;

/// Base delay for the exponential failure backoff.
pub const SYNC_BACKOFF_BASE_MS: u64 = 2000;

/// Upper bound on pending rows fetched per cycle.
pub const SYNC_PENDING_BATCH_LIMIT: i64 = 500;

/// Time box for the first-install bulk biometric download.
pub const FULL_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Time box for the first-install remote diagnostics pass.
pub const DIAGNOSTICS_TIMEOUT_SECS: u64 = 5;

/// Time box for the remote sector fetch before falling back to the cache.
pub const SECTOR_FETCH_TIMEOUT_SECS: u64 = 5;

const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Backoff delay after `consecutive_failures` failed cycles:
/// `base * 2^(failures - 1)`, exponent capped.
pub fn backoff_millis(consecutive_failures: u32) -> u64 {
    let exponent = consecutive_failures
        .saturating_sub(1)
        .min(MAX_BACKOFF_EXPONENT);
    SYNC_BACKOFF_BASE_MS.saturating_mul(1u64 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_failure() {
        assert_eq!(backoff_millis(1), 2000);
        assert_eq!(backoff_millis(2), 4000);
        assert_eq!(backoff_millis(3), 8000);
        assert_eq!(backoff_millis(5), 32000);
    }

    #[test]
    fn backoff_exponent_is_capped() {
        assert_eq!(backoff_millis(7), backoff_millis(100));
    }
}
