//! Time helpers: wall-clock timestamps for stored records and conversions
//! between caller-facing durations (seconds as floats) and [`Duration`].

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for persisted records.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert a duration expressed in seconds into a [`Duration`].
///
/// Negative, NaN and infinite inputs map to zero.
#[must_use]
pub fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Seconds left until `deadline`, measured from `now`; zero once passed.
#[must_use]
pub fn secs_remaining<I>(deadline: I, now: I) -> f64
where
    I: PartialOrd + std::ops::Sub<Output = Duration>,
{
    if deadline > now {
        (deadline - now).as_secs_f64()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        assert!(ts >= before);
    }

    #[test]
    fn should_clamp_negative_and_nan_durations_to_zero() {
        assert_eq!(duration_from_secs(-1.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs(0.4), Duration::from_millis(400));
    }

    #[test]
    fn should_report_zero_remaining_when_deadline_passed() {
        let start = std::time::Instant::now();
        let later = start + Duration::from_millis(250);
        assert!((secs_remaining(later, start) - 0.25).abs() < 1e-9);
        assert!(secs_remaining(start, later).abs() < f64::EPSILON);
    }
}
