//! `ConnectionMetrics`: monotonic counters plus a rolling average query
//! time, mutated only by the connection manager (C4).

use crate::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot of [`ConnectionMetrics`] suitable for logging or a health
/// endpoint response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub connections_attempted: u64,
    pub connections_succeeded: u64,
    pub connections_failed: u64,
    pub queries_attempted: u64,
    pub queries_failed: u64,
    pub average_query_time_millis: f64,
    pub last_connection_time_millis: i64,
    pub last_query_time_millis: i64,
    pub circuit_state: CircuitState,
}

/// Atomic counters backing `ConnectionMetrics`. `record_query`
/// maintains the rolling average with integer `n`, matching the formula
/// `avg <- (avg*(n-1) + duration) / n`.
pub struct ConnectionMetrics {
    connections_attempted: AtomicU64,
    connections_succeeded: AtomicU64,
    connections_failed: AtomicU64,
    queries_attempted: AtomicU64,
    queries_failed: AtomicU64,
    /// Average stored as millis * 1000 for fixed-point-ish precision
    /// without pulling in a decimal crate.
    average_query_time_micros: AtomicU64,
    last_connection_time_millis: AtomicI64,
    last_query_time_millis: AtomicI64,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self {
            connections_attempted: AtomicU64::new(0),
            connections_succeeded: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            queries_attempted: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            average_query_time_micros: AtomicU64::new(0),
            last_connection_time_millis: AtomicI64::new(0),
            last_query_time_millis: AtomicI64::new(0),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_attempt(&self) {
        self.connections_attempted.fetch_add(1, Ordering::Relaxed);
        self.last_connection_time_millis.store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_connection_success(&self) {
        self.connections_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_attempt(&self) {
        self.queries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_failure(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed query's duration, updating the rolling average
    /// and `last_query_time`.
    pub fn record_query_duration(&self, duration: std::time::Duration) {
        self.last_query_time_millis.store(now_millis(), Ordering::Relaxed);

        let n = self.queries_attempted.load(Ordering::Relaxed).max(1);
        let prev_avg_micros = self.average_query_time_micros.load(Ordering::Relaxed) as f64;
        let duration_micros = duration.as_micros() as f64;
        let new_avg = (prev_avg_micros * (n - 1) as f64 + duration_micros) / n as f64;
        self.average_query_time_micros.store(new_avg as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, circuit_state: CircuitState) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_attempted: self.connections_attempted.load(Ordering::Relaxed),
            connections_succeeded: self.connections_succeeded.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            queries_attempted: self.queries_attempted.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            average_query_time_millis: self.average_query_time_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            last_connection_time_millis: self.last_connection_time_millis.load(Ordering::Relaxed),
            last_query_time_millis: self.last_query_time_millis.load(Ordering::Relaxed),
            circuit_state,
        }
    }
}
