//! Time utilities for key expiration and rate limit windows.
//!
//! All instants are Unix timestamps in milliseconds. Expirations that never
//! elapse are stored as [`NEVER_EXPIRES`] rather than a null value so that
//! comparisons stay total.

use crate::signing::error::SigningError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sentinel expiration for keys that never expire (9999-12-31T23:59:59Z).
pub const NEVER_EXPIRES: i64 = 253_402_300_799_000;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// A function that returns the current instant in Unix milliseconds.
pub type TimeProviderFn = Box<dyn Fn() -> Result<i64, SigningError> + Send + Sync>;

pub(crate) fn default_time_provider() -> TimeProviderFn {
    Box::new(current_timestamp_millis)
}

/// Get current timestamp in milliseconds since Unix epoch.
///
/// Returns an error instead of panicking when the system clock is set
/// before the Unix epoch.
pub(crate) fn current_timestamp_millis() -> Result<i64, SigningError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .map_err(|e| SigningError::ClockError(format!("System time is before Unix epoch: {e}")))
}

/// Converts a whole number of hours to milliseconds, saturating on overflow.
pub(crate) fn hours_to_millis(hours: i64) -> i64 {
    hours.saturating_mul(MILLIS_PER_HOUR)
}

/// Absolute expiration for a key issued at `now` that lives for `hours`.
///
/// Zero hours means the key never expires. Negative hours are allowed and
/// yield an expiration in the past.
pub(crate) fn expiration_from_hours(now: i64, hours: i64) -> i64 {
    if hours == 0 {
        NEVER_EXPIRES
    } else {
        now.saturating_add(hours_to_millis(hours)).min(NEVER_EXPIRES)
    }
}

/// Whether at least `window` has passed between `since` and `now`.
pub(crate) fn window_elapsed(since: i64, now: i64, window: Duration) -> bool {
    let window_millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(since) >= window_millis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_millis() {
        let ts = current_timestamp_millis().unwrap();
        // After 2020-01-01 00:00:00 UTC
        assert!(ts > 1_577_836_800_000);
        assert!(ts < NEVER_EXPIRES);
    }

    #[test]
    fn test_expiration_from_hours() {
        let now = 1_700_000_000_000;
        assert_eq!(expiration_from_hours(now, 0), NEVER_EXPIRES);
        assert_eq!(expiration_from_hours(now, 1), now + MILLIS_PER_HOUR);
        assert_eq!(expiration_from_hours(now, -1), now - MILLIS_PER_HOUR);
        assert_eq!(expiration_from_hours(now, i64::MAX), NEVER_EXPIRES);
    }

    #[test]
    fn test_window_elapsed() {
        let window = Duration::from_secs(2);
        assert!(!window_elapsed(1_000, 2_999, window));
        assert!(window_elapsed(1_000, 3_000, window));
        assert!(window_elapsed(1_000, 10_000, window));
        assert!(window_elapsed(0, 0, Duration::ZERO));
    }
}
