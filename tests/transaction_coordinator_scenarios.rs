//! A transaction body that fails its first two attempts with
//! `TransactionFailed` and succeeds on the third.

use couchbase_core::driver::stub::StubCluster;
use couchbase_core::error::{CouchbaseCoreError, DriverError, ErrorKind};
use couchbase_core::transactions::execute_transaction;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn transaction_retries_twice_then_commits() {
    let cluster = StubCluster::new();
    let attempts = AtomicUsize::new(0);

    let result = execute_transaction(cluster.as_ref(), |_txn| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt < 3 {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::TransactionFailed, "stub failure")))
            } else {
                Ok(())
            }
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transaction_gives_up_after_max_attempts() {
    let cluster = StubCluster::new();
    let attempts = AtomicUsize::new(0);

    let result = execute_transaction(cluster.as_ref(), |_txn| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async move { Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::TransactionFailed, "always fails"))) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
