//! Sliding-window rate limiting keyed by caller (and server).
//!
//! Each key keeps a [`VecDeque`] of request instants. Entries older than the
//! window are pruned on every check, so memory per key is bounded by the
//! limit itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use toolbridge_core::{BridgeError, RateLimitConfig};

use crate::lock::lock;

/// Request history for one key.
#[derive(Debug, Default)]
struct Window {
    /// Longest window this key has been checked against.
    length: Duration,
    instants: VecDeque<Instant>,
}

/// Shared sliding-window limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one request for `key` or reject it with the time until a slot
    /// frees up.
    pub fn check_and_record(&self, key: &str, limit: RateLimitConfig) -> Result<(), BridgeError> {
        self.check_and_record_at(key, limit, Instant::now())
    }

    pub fn check_and_record_at(
        &self,
        key: &str,
        limit: RateLimitConfig,
        now: Instant,
    ) -> Result<(), BridgeError> {
        self.check_and_record_all_at(&[(key, limit)], now)
    }

    /// Admit one request against several limits at once.
    ///
    /// Either every key records the request or none does, so a rejection by
    /// one limit never consumes budget in another. A limit with no requests
    /// or an empty window admits nothing.
    pub fn check_and_record_all(&self, limits: &[(&str, RateLimitConfig)]) -> Result<(), BridgeError> {
        self.check_and_record_all_at(limits, Instant::now())
    }

    pub fn check_and_record_all_at(
        &self,
        limits: &[(&str, RateLimitConfig)],
        now: Instant,
    ) -> Result<(), BridgeError> {
        if let Some((key, _)) = limits.iter().find(|(_, limit)| !limit.is_usable()) {
            return Err(BridgeError::validation(format!(
                "rate limit for '{key}' admits no requests"
            )));
        }

        let mut windows = lock(&self.windows);

        let mut rejected = false;
        let mut retry_after = Duration::ZERO;
        for (key, limit) in limits {
            let used = windows.get_mut(*key).map_or(0, |window| {
                prune(&mut window.instants, limit.window(), now);
                window.instants.len()
            });
            if used >= limit.requests as usize {
                rejected = true;
                let oldest = windows
                    .get(*key)
                    .and_then(|window| window.instants.front().copied())
                    .unwrap_or(now);
                let wait = limit
                    .window()
                    .checked_sub(now.duration_since(oldest))
                    .unwrap_or(Duration::ZERO);
                retry_after = retry_after.max(wait);
            }
        }

        if rejected {
            tracing::debug!(?retry_after, "Rate limit reached");
            return Err(BridgeError::RateLimited { retry_after });
        }

        for (key, limit) in limits {
            let window = windows.entry((*key).to_string()).or_default();
            window.length = window.length.max(limit.window());
            window.instants.push_back(now);
        }
        Ok(())
    }

    /// Requests still admitted for `key` in the current window.
    pub fn remaining_at(&self, key: &str, limit: RateLimitConfig, now: Instant) -> u32 {
        let mut windows = lock(&self.windows);
        let used = windows.get_mut(key).map_or(0, |window| {
            prune(&mut window.instants, limit.window(), now);
            window.instants.len()
        });
        limit
            .requests
            .saturating_sub(u32::try_from(used).unwrap_or(u32::MAX))
    }

    /// Drop keys with no requests left inside their own window.
    pub fn compact(&self) {
        self.compact_at(Instant::now());
    }

    pub fn compact_at(&self, now: Instant) {
        lock(&self.windows).retain(|_, window| {
            prune(&mut window.instants, window.length, now);
            !window.instants.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        lock(&self.windows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(instants: &mut VecDeque<Instant>, length: Duration, now: Instant) {
    let Some(cutoff) = now.checked_sub(length) else {
        return;
    };
    while instants.front().is_some_and(|&t| t <= cutoff) {
        instants.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(requests: u32, secs: u64) -> RateLimitConfig {
        RateLimitConfig::new(requests, Duration::from_secs(secs))
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let l = limit(3, 10);

        for _ in 0..3 {
            limiter.check_and_record_at("alice", l, now).unwrap();
        }
        let err = limiter.check_and_record_at("alice", l, now).unwrap_err();
        match err {
            BridgeError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Other keys are independent.
        limiter.check_and_record_at("bob", l, now).unwrap();
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let l = limit(2, 10);

        limiter.check_and_record_at("k", l, start).unwrap();
        limiter
            .check_and_record_at("k", l, start + Duration::from_secs(4))
            .unwrap();
        let err = limiter
            .check_and_record_at("k", l, start + Duration::from_secs(6))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::RateLimited { retry_after } if retry_after == Duration::from_secs(4)
        ));

        // The first request leaves the window at exactly start + 10s.
        limiter
            .check_and_record_at("k", l, start + Duration::from_secs(10))
            .unwrap();
    }

    #[test]
    fn test_all_or_nothing() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter.check_and_record_at("server", limit(1, 60), now).unwrap();

        let err = limiter
            .check_and_record_all_at(&[("caller", limit(5, 60)), ("server", limit(1, 60))], now)
            .unwrap_err();
        assert!(matches!(err, BridgeError::RateLimited { .. }));

        // The rejected call did not consume caller budget.
        assert_eq!(limiter.remaining_at("caller", limit(5, 60), now), 5);
    }

    #[test]
    fn test_zero_requests_admits_nothing() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        let err = limiter.check_and_record_at("fresh", limit(0, 60), now).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)), "got {err:?}");

        // A usable limit alongside does not rescue the call or get charged.
        let err = limiter
            .check_and_record_all_at(&[("caller", limit(5, 60)), ("server", limit(0, 60))], now)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(limiter.remaining_at("caller", limit(5, 60), now), 5);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_zero_window_admits_nothing() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            let err = limiter.check_and_record_at("k", limit(1, 0), now).unwrap_err();
            assert!(matches!(err, BridgeError::Validation(_)));
        }
    }

    #[test]
    fn test_first_request_on_new_key_respects_limit() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        limiter.check_and_record_at("new", limit(1, 60), now).unwrap();
        let err = limiter.check_and_record_at("new", limit(1, 60), now).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::RateLimited { retry_after } if retry_after == Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_compact_drops_idle_keys() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.check_and_record_at("old", limit(1, 60), start).unwrap();
        limiter
            .check_and_record_at("fresh", limit(1, 60), start + Duration::from_secs(100))
            .unwrap();

        limiter.compact_at(start + Duration::from_secs(120));

        let windows = lock(&limiter.windows);
        assert!(!windows.contains_key("old"));
        assert!(windows.contains_key("fresh"));
    }

    #[test]
    fn test_compact_keeps_long_windows() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let daily = limit(1, 86_400);
        limiter.check_and_record_at("caller", daily, start).unwrap();

        // Two hours later the request is still inside the caller's day.
        limiter.compact_at(start + Duration::from_secs(7_200));

        assert_eq!(limiter.len(), 1);
        let err = limiter
            .check_and_record_at("caller", daily, start + Duration::from_secs(7_200))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RateLimited { .. }));
    }
}
