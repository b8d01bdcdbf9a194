//! Slow queries are logged with a truncated statement and an observed
//! duration past the threshold.

use couchbase_core::driver::stub::StubCluster;
use couchbase_core::query::{execute, QueryExecOptions, SLOW_QUERY_THRESHOLD};
use std::time::Duration;

#[tokio::test]
async fn slow_query_completes_and_exceeds_threshold() {
    let cluster = StubCluster::new();
    cluster.set_query_delay(Duration::from_millis(1500));

    let start = std::time::Instant::now();
    let response = execute(cluster.as_ref(), "select * from `travel-sample` limit 10", QueryExecOptions::default())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(response.rows.is_empty());
    assert!(elapsed >= SLOW_QUERY_THRESHOLD);
}

#[tokio::test]
async fn long_statement_is_truncated_for_logging() {
    let cluster = StubCluster::new();
    let statement = format!("select * from bucket where field = '{}'", "x".repeat(500));

    let response = execute(cluster.as_ref(), &statement, QueryExecOptions::default()).await;
    assert!(response.is_ok());
}
