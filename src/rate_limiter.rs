//! Token-bucket rate limiting: a global gate in front of outbound LLM
//! requests, and a per-fingerprint gate suppressing recurrence re-enqueues.
//!
//! Activates the `governor` dependency this crate already carried but
//! never used for anything: a global token bucket gates outbound LLM
//! requests, and a keyed-per-fingerprint bucket gates how often a single
//! recurring error is allowed to re-enter the queue.

use crate::error::QerrorsError;
use crate::fingerprint::Fingerprint;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

/// Global token bucket gating outbound requests to the LLM endpoint.
/// `HTTP_RATE_TOKENS_PER_SEC` refill, `HTTP_RATE_BURST` capacity.
pub struct HttpRateLimiter {
    inner: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpRateLimiter {
    pub fn new(tokens_per_sec: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(tokens_per_sec.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self {
            inner: RateLimiter::direct(quota),
        }
    }

    /// Consume one token if available. No grace period: the default grace
    /// is 0ms, so this fails fast rather than waiting.
    pub fn check(&self) -> Result<(), QerrorsError> {
        self.inner.check().map_err(|_| QerrorsError::RateLimited)
    }
}

/// Per-fingerprint token bucket used by the middleware to suppress
/// re-enqueueing the same recurring error too often, independent of the
/// advice cache. Default 5 tokens/min, burst 5.
pub struct ErrorRateLimiter {
    inner: RateLimiter<Fingerprint, DefaultKeyedStateStore<Fingerprint>, DefaultClock>,
}

impl ErrorRateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self {
            inner: RateLimiter::keyed(quota),
        }
    }

    /// `true` if this fingerprint still has a token (enqueue should
    /// proceed); `false` if it should be suppressed.
    pub fn allow(&self, fingerprint: Fingerprint) -> bool {
        self.inner.check_key(&fingerprint).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_rate_limiter_allows_burst_then_rejects() {
        let limiter = HttpRateLimiter::new(1, 2);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn error_rate_limiter_suppresses_after_burst_per_fingerprint() {
        let limiter = ErrorRateLimiter::new(5, 5);
        let fp = Fingerprint(1);
        for _ in 0..5 {
            assert!(limiter.allow(fp));
        }
        assert!(!limiter.allow(fp));
    }

    #[test]
    fn error_rate_limiter_tracks_fingerprints_independently() {
        let limiter = ErrorRateLimiter::new(1, 1);
        assert!(limiter.allow(Fingerprint(1)));
        assert!(!limiter.allow(Fingerprint(1)));
        assert!(limiter.allow(Fingerprint(2)));
    }
}
