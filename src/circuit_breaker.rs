//! C2 — Circuit Breaker. Lock-free atomics implementation, adapted from
//! a generic `CircuitBreakerPolicy` and gated by the error
//! classifier (C1): only failures the classifier marks non-`Application`
//! count toward the trip threshold, so a `DocumentNotFound` never moves
//! the breaker.

use crate::classify::{classify_kind, ErrorCategory};
use crate::clock::{Clock, MonotonicClock};
use crate::error::{CouchbaseCoreError, ErrorKind};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }
}

/// Point-in-time snapshot of breaker state, for `ConnectionMetrics`
/// reporting (`CircuitBreakerStats`). `success_rate`/`error_rate` are
/// derived from `success_count`/`total_operations` at snapshot time, not
/// stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: usize,
    pub success_count: u64,
    pub total_operations: u64,
    pub opened_at_millis: u64,
    pub last_failure_time_millis: u64,
    pub last_success_time_millis: u64,
    pub next_attempt_time_millis: u64,
    pub is_healthy: bool,
    pub success_rate: f64,
    pub error_rate: f64,
}

struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    success_count: AtomicU64,
    total_operations: AtomicU64,
    opened_at_millis: AtomicU64,
    last_failure_time_millis: AtomicU64,
    last_success_time_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                success_count: AtomicU64::new(0),
                total_operations: AtomicU64::new(0),
                opened_at_millis: AtomicU64::new(0),
                last_failure_time_millis: AtomicU64::new(0),
                last_success_time_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config: CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
                half_open_max_calls: 1,
            },
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                success_count: AtomicU64::new(0),
                total_operations: AtomicU64::new(0),
                opened_at_millis: AtomicU64::new(0),
                last_failure_time_millis: AtomicU64::new(0),
                last_success_time_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.current_state();
        let opened_at_millis = self.state.opened_at_millis.load(Ordering::Acquire);
        let total_operations = self.state.total_operations.load(Ordering::Acquire);
        let success_count = self.state.success_count.load(Ordering::Acquire);

        let error_rate = if total_operations == 0 {
            0.0
        } else {
            ((total_operations - success_count) as f64 / total_operations as f64) * 100.0
        };

        let next_attempt_time_millis = if state == CircuitState::Open {
            opened_at_millis.saturating_add(self.config.recovery_timeout.as_millis() as u64)
        } else {
            0
        };

        CircuitBreakerStats {
            state,
            failure_count: self.state.failure_count.load(Ordering::Acquire),
            success_count,
            total_operations,
            opened_at_millis,
            last_failure_time_millis: self.state.last_failure_time_millis.load(Ordering::Acquire),
            last_success_time_millis: self.state.last_success_time_millis.load(Ordering::Acquire),
            next_attempt_time_millis,
            is_healthy: state == CircuitState::Closed,
            success_rate: 100.0 - error_rate,
            error_rate,
        }
    }

    pub fn current_state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }

    /// Force the breaker open, bypassing the failure threshold. Used by
    /// the connection manager to fail fast during a known outage window.
    pub fn force_open(&self) {
        self.state.state.store(STATE_OPEN, Ordering::Release);
        self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
    }

    pub fn reset(&self) {
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        self.state.failure_count.store(0, Ordering::Release);
        self.state.success_count.store(0, Ordering::Release);
        self.state.total_operations.store(0, Ordering::Release);
        self.state.opened_at_millis.store(0, Ordering::Release);
        self.state.last_failure_time_millis.store(0, Ordering::Release);
        self.state.last_success_time_millis.store(0, Ordering::Release);
        self.state.half_open_calls.store(0, Ordering::Release);
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, CouchbaseCoreError>
    where
        T: Send,
        Fut: Future<Output = Result<T, CouchbaseCoreError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid state transition"),
                        }
                    } else {
                        let retry_after_ms =
                            (self.config.recovery_timeout.as_millis() as u64).saturating_sub(elapsed);
                        return Err(CouchbaseCoreError::CircuitBreakerOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            retry_after_ms,
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(CouchbaseCoreError::CircuitBreakerOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            retry_after_ms: 0,
                        });
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "circuit breaker: half-open test request"
                    );
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        self.state.total_operations.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => {
                self.state.success_count.fetch_add(1, Ordering::Relaxed);
                self.state.last_success_time_millis.store(self.now_millis(), Ordering::Relaxed);
                self.on_success();
            }
            Err(err) => {
                self.state.last_failure_time_millis.store(self.now_millis(), Ordering::Relaxed);
                if Self::counts_toward_trip(err) {
                    self.on_failure();
                } else {
                    tracing::debug!(error = %err, "circuit breaker: application error, not counted");
                }
            }
        }

        result
    }

    /// An error only trips the breaker if the classifier considers it a
    /// network/server-side failure; application-level outcomes (document
    /// not found, CAS mismatch, ...) never do (edge case).
    fn counts_toward_trip(err: &CouchbaseCoreError) -> bool {
        match err.kind() {
            Some(kind) => !matches!(classify_kind(kind).category, ErrorCategory::Application),
            None => match err {
                CouchbaseCoreError::CircuitBreakerOpen { .. } => false,
                _ => true,
            },
        }
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker -> closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: half-open test failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker -> open"
                    );
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn network_failure() -> CouchbaseCoreError {
        CouchbaseCoreError::Driver(DriverError::new(ErrorKind::Network, "boom"))
    }

    fn application_failure() -> CouchbaseCoreError {
        CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentNotFound, "no such doc"))
    }

    #[tokio::test]
    async fn starts_closed_and_executes() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CouchbaseCoreError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10));

        for _ in 0..3 {
            let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
        }

        assert_eq!(breaker.current_state(), CircuitState::Open);

        let result = breaker.execute(|| async { Ok::<_, CouchbaseCoreError>(42) }).await;
        assert!(result.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn application_errors_never_trip_the_breaker() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10));

        for _ in 0..10 {
            let result = breaker.execute(|| async { Err::<(), _>(application_failure()) }).await;
            assert!(!result.unwrap_err().is_circuit_open());
        }

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_recovery_timeout() {
        let clock = ManualClock::new();
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_millis(100)).with_clock(clock.clone());

        let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        clock.advance(150);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CouchbaseCoreError>(100)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 100);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reopens_if_half_open_probe_fails() {
        let clock = ManualClock::new();
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_millis(100)).with_clock(clock.clone());

        let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
        clock.advance(150);
        let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;

        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn disabled_breaker_never_opens() {
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::disabled());

        for _ in 0..100 {
            let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
        }

        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn successes_in_closed_state_reset_failure_count() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
        }

        let _ = breaker.execute(|| async { Ok::<_, CouchbaseCoreError>(42) }).await;
        assert_eq!(breaker.stats().failure_count, 0);

        for _ in 0..2 {
            let result = breaker.execute(|| async { Err::<(), _>(network_failure()) }).await;
            assert!(!result.unwrap_err().is_circuit_open());
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn force_open_and_reset_are_manual_overrides() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10));
        breaker.force_open();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }
}
