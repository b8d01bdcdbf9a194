//! C5 — Query Executor. Builds driver [`QueryOptions`] from
//! caller-facing options, retries classifier-retryable failures, and logs
//! slow queries and query metrics.

use crate::classify::classify_kind;
use crate::driver::{Cluster, QueryOptions as DriverQueryOptions, QueryResponse, ScanConsistency};
use crate::error::CouchbaseCoreError;
use std::time::{Duration, Instant};

/// Threshold past which a completed query is logged as slow.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(1000);

/// Statements longer than this are truncated before being logged, so a
/// multi-kilobyte N1QL statement doesn't flood the log line.
const STATEMENT_LOG_LIMIT: usize = 100;

const MAX_RETRIES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct QueryExecOptions {
    pub use_prepared_statement: bool,
    pub query_context: Option<String>,
    pub profile: bool,
    pub metrics: bool,
    pub timeout: Option<Duration>,
    pub scan_consistency: ScanConsistency,
    pub readonly: bool,
    pub max_retries: Option<usize>,
    pub request_id: Option<String>,
    pub client_context_id: Option<String>,
}

fn truncate_statement(statement: &str) -> String {
    if statement.len() <= STATEMENT_LOG_LIMIT {
        return statement.to_string();
    }

    let mut end = STATEMENT_LOG_LIMIT;
    while !statement.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &statement[..end])
}

fn build_driver_options(opts: &QueryExecOptions) -> DriverQueryOptions {
    DriverQueryOptions {
        use_prepared_statement: opts.use_prepared_statement,
        query_context: opts.query_context.clone(),
        profile: opts.profile,
        metrics: opts.metrics,
        timeout: Some(opts.timeout.unwrap_or(Duration::from_secs(30))),
        scan_consistency: opts.scan_consistency,
        readonly: opts.readonly,
        max_retries: opts.max_retries,
        request_id: opts.request_id.clone(),
        client_context_id: opts
            .client_context_id
            .clone()
            .or_else(|| opts.request_id.clone())
            .or_else(|| Some(uuid::Uuid::new_v4().to_string())),
    }
}

/// Executes `statement` against `cluster`, retrying classifier-retryable
/// failures up to `opts.max_retries` (default 3) with the classifier's
/// suggested backoff, and logging slow queries past
/// [`SLOW_QUERY_THRESHOLD`].
pub async fn execute(cluster: &dyn Cluster, statement: &str, opts: QueryExecOptions) -> Result<QueryResponse, CouchbaseCoreError> {
    let max_retries = opts.max_retries.unwrap_or(MAX_RETRIES);
    let driver_opts = build_driver_options(&opts);
    let mut last_err: Option<CouchbaseCoreError> = None;

    for attempt in 0..=max_retries {
        let start = Instant::now();
        match cluster.query(statement, driver_opts.clone()).await {
            Ok(response) => {
                let elapsed = start.elapsed();
                if elapsed >= SLOW_QUERY_THRESHOLD {
                    tracing::warn!(
                        statement = %truncate_statement(statement),
                        duration_ms = elapsed.as_millis() as u64,
                        "slow query"
                    );
                }
                if opts.metrics {
                    if let Some(metrics) = &response.metrics {
                        tracing::debug!(?metrics, statement = %truncate_statement(statement), "query metrics");
                    }
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable = err.kind().map(classify_kind).is_some_and(|c| c.is_retryable());
                if !retryable || attempt == max_retries {
                    last_err = Some(err);
                    break;
                }

                let backoff = err
                    .kind()
                    .map(classify_kind)
                    .and_then(|c| c.retry.to_backoff())
                    .map(|b| b.delay(attempt + 1))
                    .unwrap_or(Duration::from_millis(100));
                tracing::debug!(attempt = attempt + 1, delay_ms = backoff.as_millis() as u64, "retrying query");
                tokio::time::sleep(backoff).await;
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("loop always records the last failure before breaking"))
}

/// Executes `statement` scoped to `bucket.scope` by setting `query_context`
/// accordingly.
pub async fn execute_in_scope(
    cluster: &dyn Cluster,
    statement: &str,
    bucket: &str,
    scope: &str,
    mut opts: QueryExecOptions,
) -> Result<QueryResponse, CouchbaseCoreError> {
    opts.query_context = Some(format!("{bucket}.{scope}"));
    execute(cluster, statement, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::stub::{StubCluster, StubFailure};

    #[tokio::test]
    async fn successful_query_returns_rows() {
        let cluster = StubCluster::new();
        let response = execute(cluster.as_ref(), "select 1", QueryExecOptions::default()).await.unwrap();
        assert!(response.rows.is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_until_success_or_exhaustion() {
        let cluster = StubCluster::new();
        cluster.set_query_failure(StubFailure::Network);

        let err = execute(cluster.as_ref(), "select 1", QueryExecOptions { max_retries: Some(1), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Network));
    }

    #[tokio::test]
    async fn non_retryable_failure_returns_immediately() {
        let cluster = StubCluster::new();
        cluster.set_query_failure(StubFailure::DocumentNotFound);

        let err = execute(cluster.as_ref(), "select 1", QueryExecOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::DocumentNotFound));
    }

    #[tokio::test]
    async fn execute_in_scope_sets_query_context() {
        let cluster = StubCluster::new();
        let opts = QueryExecOptions::default();
        let response = execute_in_scope(cluster.as_ref(), "select 1", "travel-sample", "inventory", opts).await;
        assert!(response.is_ok());
    }

    #[test]
    fn truncates_long_statements_for_logging() {
        let long = "a".repeat(500);
        let truncated = truncate_statement(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("..."));
    }
}
