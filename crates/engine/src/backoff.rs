//! Retry backoff policy.
//!
//! `delay(n) = min(max, base × 2^n)` where `n` is the number of attempts the
//! job had already made before the failure being recorded. Deterministic, no
//! jitter. This is the only place retry delays are computed.

use chrono::{DateTime, Duration, Utc};

/// Default delay before the first retry (5 minutes).
pub const DEFAULT_BASE_DELAY_SECS: i64 = 5 * 60;

/// Default upper bound on any single delay (6 hours).
pub const DEFAULT_MAX_DELAY_SECS: i64 = 6 * 60 * 60;

/// No configured delay may exceed a year.
pub const MAX_DELAY_LIMIT_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        let limit = Duration::seconds(MAX_DELAY_LIMIT_SECS);
        let base = base.clamp(Duration::zero(), limit);
        Self {
            base,
            max: max.clamp(base, limit),
        }
    }

    pub fn from_secs(base_secs: u64, max_secs: u64) -> Self {
        let clamp = |secs: u64| Duration::seconds(secs.min(MAX_DELAY_LIMIT_SECS as u64) as i64);
        Self::new(clamp(base_secs), clamp(max_secs))
    }

    /// Delay to wait after a failure, given the attempts made before it.
    pub fn delay(&self, attempts: i32) -> Duration {
        let attempts = attempts.max(0) as u32;
        // 2^62 already dwarfs any cap; beyond that the shift would overflow.
        if attempts >= 62 {
            return self.max;
        }
        // Stay in whole seconds until the result is known to be under the cap.
        self.base
            .num_seconds()
            .checked_mul(1i64 << attempts)
            .filter(|secs| *secs <= self.max.num_seconds())
            .map_or(self.max, Duration::seconds)
    }

    pub fn next_run_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.delay(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_BASE_DELAY_SECS),
            Duration::seconds(DEFAULT_MAX_DELAY_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_points() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.next_run_at(0, now), now + Duration::minutes(5));
        assert_eq!(policy.next_run_at(1, now), now + Duration::minutes(10));
        assert_eq!(policy.next_run_at(3, now), now + Duration::minutes(40));
        assert_eq!(policy.next_run_at(10, now), now + Duration::hours(6));
    }

    #[test]
    fn test_monotonic_and_capped() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::zero();
        for n in 0..200 {
            let delay = policy.delay(n);
            assert!(delay >= previous, "delay({}) decreased", n);
            assert!(delay <= Duration::hours(6), "delay({}) above cap", n);
            previous = delay;
        }
        assert_eq!(policy.delay(i32::MAX), Duration::hours(6));
    }

    #[test]
    fn test_large_attempt_counts_hit_the_cap() {
        let policy = BackoffPolicy::default();
        for n in [20, 44, 45, 46, 49, 50, 61, 62, 63] {
            assert_eq!(policy.delay(n), Duration::hours(6), "delay({})", n);
        }
    }

    #[test]
    fn test_configured_delays_limited_to_a_year() {
        let policy = BackoffPolicy::from_secs(u64::MAX, u64::MAX);
        assert_eq!(policy.delay(0), Duration::seconds(MAX_DELAY_LIMIT_SECS));
        assert_eq!(policy.delay(50), Duration::seconds(MAX_DELAY_LIMIT_SECS));

        let now = Utc::now();
        assert_eq!(
            policy.next_run_at(50, now),
            now + Duration::seconds(MAX_DELAY_LIMIT_SECS)
        );
        assert_eq!(
            policy.next_run_at(50, DateTime::<Utc>::MAX_UTC),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_negative_attempts_treated_as_zero() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(-3), Duration::minutes(5));
    }

    #[test]
    fn test_custom_policy() {
        let policy = BackoffPolicy::from_secs(1, 8);
        assert_eq!(policy.delay(0), Duration::seconds(1));
        assert_eq!(policy.delay(2), Duration::seconds(4));
        assert_eq!(policy.delay(5), Duration::seconds(8));
    }

    #[test]
    fn test_cap_never_below_base() {
        let policy = BackoffPolicy::from_secs(600, 60);
        assert_eq!(policy.delay(0), Duration::seconds(600));
        assert_eq!(policy.delay(4), Duration::seconds(600));
    }
}
