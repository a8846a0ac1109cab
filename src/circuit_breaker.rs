//! Circuit breaker protecting the upstream LLM endpoint.
//!
//! Three-state machine (closed/open/half-open) with an explicit
//! `Open(until)` deadline and exponential back-off (capped at 5 minutes)
//! on repeated half-open failures.

use crate::logging::{log_debug, log_warn};
use std::time::{Duration, Instant};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Circuit breaker state, observable for metrics/health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Per-upstream circuit breaker with a rolling failure counter over
/// `window` and exponential-backoff reopen delays.
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    window_start: Option<Instant>,
    open_until: Option<Instant>,
    current_backoff: Duration,
    failure_threshold: u32,
    window: Duration,
    base_reset: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, window: Duration, base_reset: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            window_start: None,
            open_until: None,
            current_backoff: base_reset,
            failure_threshold,
            window,
            base_reset,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Milliseconds since the epoch at which an `Open` breaker will move to
    /// `HalfOpen`, if currently open.
    pub fn open_until_epoch_ms(&self) -> Option<u64> {
        let until = self.open_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        let now_epoch = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Some(now_epoch + remaining.as_millis() as u64)
    }

    /// Whether a call should be allowed through right now. Transitions
    /// `Open -> HalfOpen` automatically once `open_until` has passed.
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let Some(until) = self.open_until else {
                    return true;
                };
                if Instant::now() >= until {
                    log_debug!(circuit = "half_open", "circuit breaker attempting recovery probe");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                log_debug!(circuit = "closed", "probe succeeded, circuit breaker closed");
                self.reset();
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.window_start = None;
            }
            CircuitState::Open => {
                self.reset();
            }
        }
    }

    /// Record a failed call. Returns `true` exactly on the edge where this
    /// call closed-to-open or half_open-to-open transitioned the breaker,
    /// so the caller can count circuit-open transitions without double
    /// counting every failure while it stays open.
    pub fn record_failure(&mut self) -> bool {
        match self.state {
            CircuitState::HalfOpen => {
                self.current_backoff = (self.current_backoff * 2).min(MAX_BACKOFF);
                self.open(self.current_backoff);
                log_warn!(
                    circuit = "reopened",
                    backoff_ms = self.current_backoff.as_millis() as u64,
                    "probe failed, circuit breaker reopened"
                );
                true
            }
            CircuitState::Closed => {
                let now = Instant::now();
                let window_start = *self.window_start.get_or_insert(now);
                if now.duration_since(window_start) > self.window {
                    self.window_start = Some(now);
                    self.failure_count = 1;
                } else {
                    self.failure_count += 1;
                }

                if self.failure_count >= self.failure_threshold {
                    self.current_backoff = self.base_reset;
                    self.open(self.current_backoff);
                    log_warn!(
                        circuit = "opened",
                        failure_count = self.failure_count,
                        threshold = self.failure_threshold,
                        "failure threshold reached within window, circuit breaker opened"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        }
    }

    fn open(&mut self, backoff: Duration) {
        self.state = CircuitState::Open;
        self.open_until = Some(Instant::now() + backoff);
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.window_start = None;
        self.open_until = None;
        self.current_backoff = self.base_reset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures_within_window() {
        let mut breaker =
            CircuitBreaker::new(5, Duration::from_secs(60), Duration::from_millis(30_000));
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_failure_doubles_backoff_capped_at_five_minutes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_secs(200));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.state = CircuitState::HalfOpen;
        breaker.record_failure();
        assert_eq!(breaker.current_backoff, Duration::from_secs(300));
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_secs(30));
        breaker.record_failure();
        breaker.state = CircuitState::HalfOpen;
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count, 0);
    }

    #[test]
    fn rejects_while_open_before_deadline() {
        let mut breaker =
            CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_secs(30));
        breaker.record_failure();
        assert!(!breaker.should_allow_request());
    }

    #[test]
    fn record_failure_reports_the_open_transition_only_once() {
        let mut breaker =
            CircuitBreaker::new(2, Duration::from_secs(60), Duration::from_secs(30));
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());

        breaker.state = CircuitState::HalfOpen;
        assert!(breaker.record_failure());
    }
}
