//! Exponential backoff with a cap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
/// Default growth factor between attempts.
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
/// Default upper bound on any single delay.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;

/// Backoff curve shared by supervisor restarts and call retries.
///
/// The delay for attempt `n` (zero-based) is `min(base * multiplier^n, max)`,
/// so the sequence is non-decreasing and never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub multiplier: u32,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_BASE_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl BackoffPolicy {
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            multiplier,
            max_ms: max.as_millis() as u64,
        }
    }

    /// No delay at all; handy for tests.
    pub const fn immediate() -> Self {
        Self {
            base_ms: 0,
            multiplier: 1,
            max_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_ms == 0 {
            return Duration::ZERO;
        }
        // A multiplier below 1 would make the curve decrease.
        let factor = u64::from(self.multiplier.max(1));
        let delay = factor
            .checked_pow(attempt)
            .and_then(|m| self.base_ms.checked_mul(m))
            .unwrap_or(u64::MAX);
        Duration::from_millis(delay.min(self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_curve() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_monotonic_and_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(7), 3, Duration::from_secs(2));
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_secs(2));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(2));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), u32::MAX, Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_multiplier_is_treated_as_constant() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), 0, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"base_ms": 50}"#).unwrap();
        assert_eq!(policy.base_ms, 50);
        assert_eq!(policy.max_ms, DEFAULT_BACKOFF_MAX_MS);
    }
}
