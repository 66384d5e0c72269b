// src/pool/circuit.rs
//! Gateway-wide circuit breaker.
//!
//! One breaker guards the whole backend, independent of which physical
//! connection served a request. State is mutated only through
//! `record_success` / `record_failure` / `is_open`; the gateway wraps the
//! breaker in a single `RwLock`.

use log::{info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    /// Normal operation, failures counted up, successes counted down.
    Closed,
    /// Failing fast, all attempts rejected.
    Open,
    /// Admitting a bounded number of trial attempts.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_calls: 0,
            half_open_successes: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Checked before every request. Returns `true` while requests must be
    /// rejected. The Open -> HalfOpen transition happens here once the
    /// recovery timeout has elapsed. This is a pure gate: a request that
    /// passes it but never dispatches a backend attempt (a cache hit, for
    /// example) must not touch the trial budget, so slots are claimed
    /// separately via `begin_trial`.
    pub fn is_open(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let recovered = self
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    info!("Circuit breaker entering half-open trial phase");
                    self.state = BreakerState::HalfOpen;
                    self.half_open_calls = 0;
                    self.half_open_successes = 0;
                    false
                } else {
                    true
                }
            }
            BreakerState::HalfOpen => self.half_open_calls >= self.half_open_max_calls,
        }
    }

    /// Claims a trial slot immediately before a backend attempt is
    /// dispatched. Returns `false` when the attempt may not proceed. Every
    /// claimed slot is resolved by exactly one `record_success` /
    /// `record_failure` call.
    pub fn begin_trial(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if self.half_open_calls < self.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.half_open_max_calls {
                    info!(
                        "Circuit breaker closed after {} successful trial calls",
                        self.half_open_successes
                    );
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                }
            }
            // A success while Open has no attempt to account for.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(Instant::now());
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        self.failure_count
                    );
                    self.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!("Circuit breaker reopened: trial call failed");
                self.state = BreakerState::Open;
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(threshold, recovery, 3)
    }

    #[test]
    fn opens_after_failure_threshold() {
        let mut cb = breaker(3, Duration::from_secs(60));
        assert!(!cb.is_open());

        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn successes_decrement_failures_with_floor_zero() {
        let mut cb = breaker(3, Duration::from_secs(60));
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 1);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn transitions_to_half_open_after_recovery_timeout() {
        let mut cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(30));
        // The first check after the window admits trial traffic again.
        assert!(!cb.is_open());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.begin_trial());
    }

    #[test]
    fn half_open_closes_after_enough_trial_successes() {
        let mut cb = breaker(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        for _ in 0..3 {
            assert!(!cb.is_open());
            assert!(cb.begin_trial());
            cb.record_success();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn half_open_limits_concurrent_trial_calls() {
        let mut cb = breaker(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        assert!(!cb.is_open());
        assert!(cb.begin_trial());
        assert!(cb.begin_trial());
        assert!(cb.begin_trial());
        // Trial budget exhausted until results come back.
        assert!(!cb.begin_trial());
        assert!(cb.is_open());
    }

    #[test]
    fn gate_checks_without_an_attempt_leave_the_trial_budget_intact() {
        let mut cb = breaker(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        // Requests that short-circuit after the gate (served from cache)
        // never dispatch an attempt and must not spend trial slots.
        for _ in 0..10 {
            assert!(!cb.is_open());
        }

        // The full trial budget is still available to real attempts.
        for _ in 0..3 {
            assert!(cb.begin_trial());
            cb.record_success();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let mut cb = breaker(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        assert!(!cb.is_open());
        assert!(cb.begin_trial());
        cb.record_success();
        assert!(cb.begin_trial());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
    }
}
