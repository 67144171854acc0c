//! Per-backend circuit breaker.
//!
//! CLOSED admits everything and counts consecutive failures; the Nth
//! consecutive failure opens the circuit. OPEN rejects without calling the
//! backend until the recovery window elapses, then HALF_OPEN admits exactly
//! one probe: success closes the circuit, failure reopens it. The breaker
//! never inspects error content; any error from the wrapped call is a
//! failure.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::{CircuitOpen, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_window: Duration,
    /// Probe successes required in HALF_OPEN before closing.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Free backends tolerate more flakiness and recover quickly.
    pub const fn free_tier() -> Self {
        Self {
            failure_threshold: 5,
            recovery_window: Duration::from_secs(60),
            success_threshold: 1,
        }
    }

    /// Paid backends trip early; every failed call still costs money.
    pub const fn paid_tier() -> Self {
        Self {
            failure_threshold: 3,
            recovery_window: Duration::from_secs(120),
            success_threshold: 1,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::free_tier()
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    probe_in_flight: bool,
    opened_at: Option<UtcDateTime>,
    last_failure_at: Option<UtcDateTime>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    state_transitions: u64,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            probe_in_flight: false,
            opened_at: None,
            last_failure_at: None,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            state_transitions: 0,
        }
    }
}

impl CircuitInner {
    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            self.state = to;
            self.state_transitions += 1;
        }
    }
}

/// Statistics snapshot for one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatistics {
    pub backend: &'static str,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub state_transitions: u64,
    pub failure_rate_pct: f64,
    pub opened_at: Option<UtcDateTime>,
    pub last_failure_at: Option<UtcDateTime>,
    pub recovery_in_seconds: Option<u64>,
}

/// Thread-safe circuit breaker guarding one backend.
pub struct CircuitBreaker {
    backend: &'static str,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(backend: &'static str, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            config,
            clock,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Admit or reject one call. The window check, the OPEN → HALF_OPEN
    /// transition and the probe claim happen atomically under the mutex.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("circuit lock not poisoned");
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.total_rejections += 1;
                    Err(CircuitOpen {
                        backend: self.backend,
                        recovery_in: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let remaining = self.remaining_window(&inner, now);
                if remaining.is_zero() {
                    inner.transition(CircuitState::HalfOpen);
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = true;
                    tracing::info!(backend = self.backend, "circuit half-open, probing");
                    Ok(())
                } else {
                    inner.total_rejections += 1;
                    Err(CircuitOpen {
                        backend: self.backend,
                        recovery_in: remaining,
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit lock not poisoned");
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;

        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                inner.transition(CircuitState::Closed);
                inner.opened_at = None;
                inner.consecutive_successes = 0;
                tracing::info!(backend = self.backend, "circuit closed after probe success");
            }
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("circuit lock not poisoned");
        inner.total_failures += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes = 0;
                inner.transition(CircuitState::Open);
                inner.opened_at = Some(now);
                tracing::warn!(backend = self.backend, "probe failed, circuit reopened");
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        backend = self.backend,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run one attempt through the breaker. The outer `Err` means the call
    /// was rejected without being attempted; the inner result is the call's
    /// own outcome, already accounted for.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<Result<T, E>, CircuitOpen>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        let result = fut.await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        Ok(result)
    }

    /// Whether a call issued now would be admitted. Read-only: does not
    /// transition states or claim the probe.
    pub fn is_available(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock().expect("circuit lock not poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => self.remaining_window(&inner, now).is_zero(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .expect("circuit lock not poisoned")
            .state
    }

    /// Force CLOSED. Diagnostic use only.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit lock not poisoned");
        inner.transition(CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.probe_in_flight = false;
        inner.opened_at = None;
        inner.last_failure_at = None;
        tracing::info!(backend = self.backend, "circuit manually reset");
    }

    pub fn statistics(&self) -> CircuitStatistics {
        let now = self.clock.now();
        let inner = self.inner.lock().expect("circuit lock not poisoned");

        let attempted = inner.total_successes + inner.total_failures;
        let failure_rate_pct = if attempted > 0 {
            inner.total_failures as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };
        let recovery_in_seconds = (inner.state == CircuitState::Open)
            .then(|| self.remaining_window(&inner, now).as_secs());

        CircuitStatistics {
            backend: self.backend,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            state_transitions: inner.state_transitions,
            failure_rate_pct,
            opened_at: inner.opened_at,
            last_failure_at: inner.last_failure_at,
            recovery_in_seconds,
        }
    }

    fn remaining_window(&self, inner: &CircuitInner, now: UtcDateTime) -> Duration {
        let Some(opened_at) = inner.opened_at else {
            return Duration::ZERO;
        };
        let elapsed = (now - opened_at).unsigned_abs();
        self.config.recovery_window.saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32, window: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(
            UtcDateTime::parse("2024-05-01T09:00:00Z").expect("valid"),
        ));
        let breaker = CircuitBreaker::new(
            "free",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_window: window,
                success_threshold: 1,
            },
            clock.clone(),
        );
        (breaker, clock)
    }

    #[test]
    fn nth_consecutive_failure_opens() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_available());
    }

    #[test]
    fn success_resets_the_consecutive_counter() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_until_window_elapses() {
        let (breaker, clock) = breaker(1, Duration::from_secs(60));
        breaker.record_failure();

        let rejection = breaker.try_acquire().expect_err("open circuit rejects");
        assert_eq!(rejection.backend, "free");
        assert!(rejection.recovery_in > Duration::ZERO);

        clock.advance(Duration::from_secs(59));
        assert!(breaker.try_acquire().is_err());

        clock.advance(Duration::from_secs(1));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        breaker.record_failure();
        clock.advance(Duration::from_secs(10));

        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.try_acquire().is_err(), "second caller must wait");
        assert!(!breaker.is_available());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn probe_failure_reopens_and_restamps_window() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        breaker.record_failure();
        clock.advance(Duration::from_secs(10));

        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // window restarts from the probe failure
        clock.advance(Duration::from_secs(9));
        assert!(breaker.try_acquire().is_err());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn statistics_count_every_outcome() {
        let (breaker, clock) = breaker(2, Duration::from_secs(30));

        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        let _ = breaker.try_acquire(); // rejected while open

        let stats = breaker.statistics();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.state_transitions, 1);
        assert!((stats.failure_rate_pct - 66.66).abs() < 0.5);
        assert_eq!(stats.recovery_in_seconds, Some(30));

        clock.advance(Duration::from_secs(12));
        assert_eq!(breaker.statistics().recovery_in_seconds, Some(18));
    }

    #[test]
    fn reset_forces_closed() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(600));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn call_accounts_for_the_wrapped_outcome() {
        let (breaker, _clock) = breaker(2, Duration::from_secs(30));

        let ok: Result<Result<u32, &str>, _> = breaker.call(async { Ok(7) }).await;
        assert_eq!(ok.expect("admitted").expect("succeeded"), 7);

        let failed: Result<Result<u32, &str>, _> = breaker.call(async { Err("boom") }).await;
        assert!(failed.expect("admitted").is_err());

        let stats = breaker.statistics();
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 1);
    }
}
