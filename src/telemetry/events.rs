use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Structured events emitted while exercising the resilience and
/// orchestration layer. Every public component (C2, C4-C7) reports through
/// this enum so a sink only needs one `emit` method.
#[derive(Debug, Clone, PartialEq)]
pub enum CouchbaseEvent {
    Connection(ConnectionEvent),
    CircuitBreaker(CircuitBreakerEvent),
    Retry(RetryEvent),
    Query(QueryEvent),
    Kv(KvEvent),
    Transaction(TransactionEvent),
}

/// C4 connection manager lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected { bucket: String },
    Closed { bucket: String },
    HealthCheckFailed { service: String, reason: String },
}

/// C2 circuit breaker transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    Opened { failure_count: usize },
    HalfOpen,
    Closed,
}

/// C5/C6/C7 shared retry events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    Attempt { attempt: usize, delay: Duration },
    Exhausted { total_attempts: usize },
}

/// C5 query executor events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// A query ran past the configured slow-query threshold.
    Slow { duration: Duration, threshold: Duration },
}

/// C6 KV operation events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvEvent {
    Executed { verb: &'static str, duration: Duration },
}

/// C7 transaction coordinator events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    Retried { transaction_id: String, attempt: usize },
    Committed { transaction_id: String },
    CommitAmbiguous { transaction_id: String },
}

impl fmt::Display for CouchbaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouchbaseEvent::Connection(e) => write!(f, "Connection::{}", e),
            CouchbaseEvent::CircuitBreaker(e) => write!(f, "CircuitBreaker::{}", e),
            CouchbaseEvent::Retry(e) => write!(f, "Retry::{}", e),
            CouchbaseEvent::Query(e) => write!(f, "Query::{}", e),
            CouchbaseEvent::Kv(e) => write!(f, "Kv::{}", e),
            CouchbaseEvent::Transaction(e) => write!(f, "Transaction::{}", e),
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected { bucket } => write!(f, "Connected(bucket={})", bucket),
            ConnectionEvent::Closed { bucket } => write!(f, "Closed(bucket={})", bucket),
            ConnectionEvent::HealthCheckFailed { service, reason } => {
                write!(f, "HealthCheckFailed(service={}, reason={})", service, reason)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => write!(f, "Attempt(#{}, delay={:?})", attempt, delay),
            RetryEvent::Exhausted { total_attempts } => write!(f, "Exhausted(attempts={})", total_attempts),
        }
    }
}

impl fmt::Display for QueryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryEvent::Slow { duration, threshold } => {
                write!(f, "Slow(duration={:?}, threshold={:?})", duration, threshold)
            }
        }
    }
}

impl fmt::Display for KvEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvEvent::Executed { verb, duration } => write!(f, "Executed(verb={}, duration={:?})", verb, duration),
        }
    }
}

impl fmt::Display for TransactionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionEvent::Retried { transaction_id, attempt } => {
                write!(f, "Retried(txn={}, attempt={})", transaction_id, attempt)
            }
            TransactionEvent::Committed { transaction_id } => write!(f, "Committed(txn={})", transaction_id),
            TransactionEvent::CommitAmbiguous { transaction_id } => {
                write!(f, "CommitAmbiguous(txn={})", transaction_id)
            }
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a [`CouchbaseEvent`] into a JSON value for sinks that ship
/// structured logs externally.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &CouchbaseEvent) -> serde_json::Value {
    match event {
        CouchbaseEvent::Connection(e) => match e {
            ConnectionEvent::Connected { bucket } => json!({"kind": "connected", "bucket": bucket}),
            ConnectionEvent::Closed { bucket } => json!({"kind": "closed", "bucket": bucket}),
            ConnectionEvent::HealthCheckFailed { service, reason } => {
                json!({"kind": "health_check_failed", "service": service, "reason": reason})
            }
        },
        CouchbaseEvent::CircuitBreaker(e) => match e {
            CircuitBreakerEvent::Opened { failure_count } => {
                json!({"kind": "circuit_opened", "failures": *failure_count})
            }
            CircuitBreakerEvent::HalfOpen => json!({"kind": "circuit_half_open"}),
            CircuitBreakerEvent::Closed => json!({"kind": "circuit_closed"}),
        },
        CouchbaseEvent::Retry(e) => match e {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts } => {
                json!({"kind": "retry_exhausted", "attempts": *total_attempts})
            }
        },
        CouchbaseEvent::Query(e) => match e {
            QueryEvent::Slow { duration, threshold } => json!({
                "kind": "slow_query",
                "duration_ms": clamp_u64(duration.as_millis()),
                "threshold_ms": clamp_u64(threshold.as_millis()),
            }),
        },
        CouchbaseEvent::Kv(e) => match e {
            KvEvent::Executed { verb, duration } => json!({
                "kind": "kv_executed",
                "verb": verb,
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
        },
        CouchbaseEvent::Transaction(e) => match e {
            TransactionEvent::Retried { transaction_id, attempt } => json!({
                "kind": "transaction_retried",
                "transaction_id": transaction_id,
                "attempt": *attempt,
            }),
            TransactionEvent::Committed { transaction_id } => {
                json!({"kind": "transaction_committed", "transaction_id": transaction_id})
            }
            TransactionEvent::CommitAmbiguous { transaction_id } => {
                json!({"kind": "transaction_commit_ambiguous", "transaction_id": transaction_id})
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_event_display() {
        let event = RetryEvent::Attempt { attempt: 2, delay: Duration::from_millis(100) };
        assert!(event.to_string().contains("Attempt"));
        assert!(event.to_string().contains("#2"));
    }

    #[test]
    fn circuit_breaker_event_display() {
        let event = CircuitBreakerEvent::Opened { failure_count: 5 };
        assert!(event.to_string().contains("Opened"));
        assert!(event.to_string().contains('5'));
    }

    #[test]
    fn transaction_commit_ambiguous_display() {
        let event = TransactionEvent::CommitAmbiguous { transaction_id: "txn-1".into() };
        assert!(event.to_string().contains("CommitAmbiguous"));
        assert!(event.to_string().contains("txn-1"));
    }

    #[test]
    fn couchbase_event_clones_and_compares() {
        let event = CouchbaseEvent::Kv(KvEvent::Executed { verb: "upsert", duration: Duration::from_millis(5) });
        let cloned = event.clone();
        assert_eq!(event, cloned);
    }
}
