//! Named sliding-window rate limit buckets.
//!
//! Buckets are keyed by caller-chosen strings (email when authenticated, IP
//! otherwise) and answer 429 with an `X-RateLimit-Reset` header carrying the
//! unix time the oldest request leaves the window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ohq_domain::ApiError;

/// Signups: 30 per 15 minutes.
pub const SIGNUP_LIMIT: (usize, i64) = (30, 15 * 60);
/// OAuth callbacks: 15 per 15 minutes.
pub const OAUTH_LIMIT: (usize, i64) = (15, 15 * 60);
/// Course/queue creation: 5 per minute.
pub const CREATE_LIMIT: (usize, i64) = (5, 60);

/// Outcome of a rate-limit check.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Unix seconds at which a slot opens. Non-decreasing within a window.
    pub reset: i64,
}

#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Vec<i64>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request against `bucket:key` and report whether it fits the
    /// window.
    pub fn check(&self, bucket: &str, key: &str, max: usize, window_secs: i64) -> RateLimitInfo {
        self.check_at(bucket, key, max, window_secs, Utc::now().timestamp())
    }

    fn check_at(
        &self,
        bucket: &str,
        key: &str,
        max: usize,
        window_secs: i64,
        now: i64,
    ) -> RateLimitInfo {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entries = buckets.entry(format!("{bucket}:{key}")).or_default();

        entries.retain(|t| now - *t < window_secs);

        if entries.len() >= max {
            let oldest = entries.iter().min().copied().unwrap_or(now);
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                reset: oldest + window_secs,
            };
        }

        entries.push(now);
        let oldest = entries.iter().min().copied().unwrap_or(now);
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining: max - entries.len(),
            reset: oldest + window_secs,
        }
    }

    /// Check and convert a refusal into the 429 error.
    pub fn enforce(
        &self,
        bucket: &str,
        key: &str,
        (max, window_secs): (usize, i64),
    ) -> Result<(), ApiError> {
        let info = self.check(bucket, key, max, window_secs);
        if info.allowed {
            Ok(())
        } else {
            Err(ApiError::RateLimited { reset: info.reset })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excess_requests_are_refused_until_the_window_rolls() {
        let limiter = RateLimiter::new();
        let t0 = 1_700_000_000;

        for _ in 0..3 {
            assert!(limiter.check_at("signup", "a@x.edu", 3, 60, t0).allowed);
        }
        let refused = limiter.check_at("signup", "a@x.edu", 3, 60, t0 + 1);
        assert!(!refused.allowed);
        assert_eq!(refused.reset, t0 + 60);

        // Once the oldest entry ages out the key has room again.
        assert!(limiter.check_at("signup", "a@x.edu", 3, 60, t0 + 60).allowed);
    }

    #[test]
    fn reset_is_non_decreasing_within_a_window() {
        let limiter = RateLimiter::new();
        let t0 = 1_700_000_000;
        let mut last_reset = 0;
        for i in 0..10 {
            let info = limiter.check_at("signup", "a@x.edu", 3, 60, t0 + i);
            assert!(info.reset >= last_reset);
            last_reset = info.reset;
        }
    }

    #[test]
    fn buckets_and_keys_are_independent() {
        let limiter = RateLimiter::new();
        let t0 = 1_700_000_000;

        assert!(limiter.check_at("a", "k", 1, 60, t0).allowed);
        assert!(!limiter.check_at("a", "k", 1, 60, t0).allowed);
        assert!(limiter.check_at("b", "k", 1, 60, t0).allowed);
        assert!(limiter.check_at("a", "other", 1, 60, t0).allowed);
    }

    #[test]
    fn enforce_maps_to_rate_limited_error() {
        let limiter = RateLimiter::new();
        assert!(limiter.enforce("create", "1.2.3.4", (1, 60)).is_ok());
        let err = limiter.enforce("create", "1.2.3.4", (1, 60)).unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
    }
}
