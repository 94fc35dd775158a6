//! Epoch-millisecond clock for job and worker bookkeeping
//!
//! Job records, worker expiry deadlines, and cache entries all carry epoch
//! milliseconds: they serialize compactly, compare cheaply, and survive a
//! round-trip through the datastore unchanged. The helpers here cover the
//! three shapes the coordinator needs: stamping, deadline arithmetic, and
//! turning two stamps into seconds for reporting.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current epoch time in milliseconds.
///
/// # Panics
/// Panics if the system time is before the Unix epoch (1970-01-01),
/// which would indicate a severely misconfigured system.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as u64
}

/// A deadline `secs_from_now` seconds in the future, in epoch millis.
///
/// Used for worker expiry (`heartbeat_interval × liveness`), cache entry
/// TTLs, and the wait windows of the polling components.
pub fn deadline_millis(secs_from_now: u64) -> u64 {
    now_millis() + secs_from_now * 1000
}

/// Signed seconds from now until `deadline_ms`; negative once passed.
///
/// Expired workers report how long ago their deadline lapsed, so this does
/// not saturate at zero.
pub fn secs_until(deadline_ms: u64) -> f64 {
    (deadline_ms as f64 - now_millis() as f64) / 1000.0
}

/// Seconds between two millisecond stamps, zero when they are reversed.
///
/// Roundtrip times are computed from a transmit stamp and a return stamp
/// that were taken on the same host, but clock steps can still reorder
/// them; a negative roundtrip would only confuse the profiling reports.
pub fn secs_between(start_ms: u64, end_ms: u64) -> f64 {
    end_ms.saturating_sub(start_ms) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_in_the_future() {
        let before = now_millis();
        let deadline = deadline_millis(60);
        assert!(deadline >= before + 60_000);
        assert!(secs_until(deadline) > 0.0);
    }

    #[test]
    fn test_secs_until_goes_negative_after_expiry() {
        let lapsed = now_millis().saturating_sub(5_000);
        let remaining = secs_until(lapsed);
        assert!(remaining < 0.0);
        assert!(remaining > -6.0);
    }

    #[test]
    fn test_secs_between_roundtrip_shape() {
        let transmitted = now_millis();
        let returned = transmitted + 1_250;
        let roundtrip = secs_between(transmitted, returned);
        assert!((roundtrip - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_secs_between_reversed_stamps() {
        let now = now_millis();
        assert_eq!(secs_between(now + 1000, now), 0.0);
    }
}
