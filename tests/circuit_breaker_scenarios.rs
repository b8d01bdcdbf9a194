//! Breaker trip, half-open recovery, application errors not counted,
//! ambiguous timeout never retried.

use couchbase_core::circuit_breaker::CircuitBreakerPolicy;
use couchbase_core::driver::stub::{StubCollection, StubFailure};
use couchbase_core::driver::{Collection, KvGetOptions};
use couchbase_core::error::{CouchbaseCoreError, DocumentId, DriverError, ErrorKind};
use std::time::Duration;

async fn network_failure() -> Result<(), CouchbaseCoreError> {
    Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::Network, "connection reset")))
}

#[tokio::test]
async fn breaker_opens_at_five_failures() {
    let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(60));

    for _ in 0..5 {
        let result = breaker.execute(|| network_failure()).await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_circuit_open());
    }

    let sixth = breaker.execute(|| network_failure()).await;
    assert!(sixth.unwrap_err().is_circuit_open());

    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 5);
}

#[tokio::test]
async fn half_open_recovery_closes_breaker_after_timer() {
    let clock = couchbase_core::clock::MonotonicClock::default();
    let breaker = CircuitBreakerPolicy::new(5, Duration::from_millis(50)).with_clock(clock);

    for _ in 0..5 {
        let _ = breaker.execute(|| network_failure()).await;
    }
    assert!(breaker.execute(|| network_failure()).await.unwrap_err().is_circuit_open());

    tokio::time::sleep(Duration::from_millis(60)).await;

    for _ in 0..3 {
        let result = breaker.execute(|| async { Ok::<_, CouchbaseCoreError>(()) }).await;
        assert!(result.is_ok());
    }

    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn application_error_does_not_move_the_breaker() {
    let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(60));
    let collection = StubCollection::new();
    collection.set_failure(StubFailure::DocumentNotFound);
    let id = DocumentId::new("missing");

    for _ in 0..10 {
        let result = breaker
            .execute(|| async { collection.get(&id, &KvGetOptions::default()).await })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn ambiguous_timeout_is_never_retried() {
    use couchbase_core::retry::RetryPolicy;

    let retry = RetryPolicy::builder().max_attempts(5).unwrap().build();
    let attempts = std::sync::atomic::AtomicUsize::new(0);

    let result = retry
        .execute(|| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {
                Err::<(), _>(CouchbaseCoreError::Driver(DriverError::new(
                    ErrorKind::AmbiguousTimeout,
                    "no ack received",
                )))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
}
