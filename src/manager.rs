//! C4 — Connection Manager. Owns the single driver connection for the
//! process, bucket/collection handle caching, the periodic health probe,
//! and the circuit-breaker-guarded retry executor the rest of the crate
//! calls through.

use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitState};
use crate::classify::classify_kind;
use crate::config::CouchbaseConfig;
use crate::driver::{Cluster, Collection, ConnectOptions, Driver, ServiceKind};
use crate::error::{CouchbaseCoreError, DriverError, ErrorKind};
use crate::health::{self, HealthStatus};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::options::{build_connection_profile, ConnectionProfile};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

static INSTANCE: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

const CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Per-call override for [`ConnectionManager::execute_with_retry`].
/// `max_attempts` defaults to [`DEFAULT_MAX_ATTEMPTS`] when left unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryContext {
    pub max_attempts: Option<usize>,
}

impl RetryContext {
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self { max_attempts: Some(max_attempts) }
    }
}
const BUCKET_READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const BUCKET_READY_BUDGET: Duration = Duration::from_secs(5);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

fn connect_backoff(attempt: u32) -> Duration {
    let base_millis = 1000u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = base_millis.min(8000);
    let jitter_fraction = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered = (capped as f64 * (1.0 + jitter_fraction)).max(0.0);
    Duration::from_millis(jittered as u64)
}

/// Singleton connection lifecycle manager. Obtained once via
/// [`ConnectionManager::initialize`]; subsequent calls return the existing
/// instance rather than reconnecting.
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    config: CouchbaseConfig,
    profile: ConnectionProfile,
    cluster: RwLock<Option<Arc<dyn Cluster>>>,
    collections: Mutex<HashMap<String, Arc<dyn Collection>>>,
    metrics: ConnectionMetrics,
    breaker: CircuitBreakerPolicy,
    health_task: Mutex<Option<JoinHandle<()>>>,
    last_known_healthy: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Connects, waits for the configured bucket to report ready, starts
    /// the health timer, and installs the singleton. Returns the existing
    /// instance if one was already initialized.
    pub async fn initialize(driver: Arc<dyn Driver>, config: CouchbaseConfig) -> Result<Arc<ConnectionManager>, CouchbaseCoreError> {
        if let Some(existing) = INSTANCE.get() {
            return Ok(Arc::clone(existing));
        }

        let meta = crate::config::ConnectionStringMeta::parse(&config.connection_string)
            .map_err(|e| CouchbaseCoreError::Config(e.to_string()))?;
        let profile = build_connection_profile(&config, &meta);

        let metrics = ConnectionMetrics::new();
        let cluster = Self::connect_with_retry(&driver, &config, &profile, &metrics).await?;
        Self::wait_for_bucket_ready(cluster.as_ref(), &config).await?;

        let manager = Arc::new(ConnectionManager {
            driver,
            config,
            profile,
            cluster: RwLock::new(Some(cluster)),
            collections: Mutex::new(HashMap::new()),
            metrics,
            breaker: CircuitBreakerPolicy::new(5, Duration::from_secs(60)),
            health_task: Mutex::new(None),
            last_known_healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let health_handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager.run_health_timer().await;
            })
        };
        *manager.health_task.lock().expect("health task mutex poisoned") = Some(health_handle);

        match INSTANCE.set(Arc::clone(&manager)) {
            Ok(()) => Ok(manager),
            Err(_) => Ok(Arc::clone(INSTANCE.get().expect("just failed to set, so it is present"))),
        }
    }

    /// Returns the process-wide instance, if [`initialize`] has run.
    pub fn instance() -> Option<Arc<ConnectionManager>> {
        INSTANCE.get().cloned()
    }

    async fn connect_with_retry(
        driver: &Arc<dyn Driver>,
        config: &CouchbaseConfig,
        profile: &ConnectionProfile,
        metrics: &ConnectionMetrics,
    ) -> Result<Arc<dyn Cluster>, CouchbaseCoreError> {
        let mut last_err: Option<CouchbaseCoreError> = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            metrics.record_connection_attempt();
            let options: ConnectOptions = profile.connect_options.clone();
            match driver.connect(&config.connection_string, options).await {
                Ok(cluster) => {
                    metrics.record_connection_success();
                    return Ok(cluster);
                }
                Err(err) => {
                    metrics.record_connection_failure();
                    if err.kind() == Some(ErrorKind::AuthenticationFailure) {
                        return Err(err);
                    }
                    last_err = Some(err);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(connect_backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            CouchbaseCoreError::Driver(DriverError::new(ErrorKind::Network, "connect failed with no recorded error"))
        }))
    }

    async fn wait_for_bucket_ready(cluster: &dyn Cluster, config: &CouchbaseConfig) -> Result<(), CouchbaseCoreError> {
        let deadline = tokio::time::Instant::now() + BUCKET_READY_BUDGET;
        loop {
            let bucket = cluster.bucket(&config.bucket).await?;
            match bucket.get_all_scopes().await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(err);
                    }
                    tokio::time::sleep(BUCKET_READY_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn run_health_timer(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it, the manager just connected
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let _ = self.check_health().await;
        }
    }

    /// Runs the KeyValue+Query ping and returns the resulting
    /// [`HealthStatus`], updating the manager's last-known-healthy flag.
    pub async fn check_health(&self) -> HealthStatus {
        let guard = self.cluster.read().await;
        let Some(cluster) = guard.as_ref() else {
            return health::disconnected("not connected");
        };

        let bucket = match cluster.bucket(&self.config.bucket).await {
            Ok(b) => b,
            Err(err) => return health::critical(err.to_string()),
        };

        let start = std::time::Instant::now();
        let ping = bucket.ping(&[ServiceKind::KeyValue, ServiceKind::Query], Duration::from_secs(5)).await;
        let latency_millis = start.elapsed().as_millis() as u64;

        match ping {
            Ok(result) => {
                let was_healthy = self.last_known_healthy.load(Ordering::SeqCst);
                let status = health::analyze_ping(&result, latency_millis, self.breaker.stats(), was_healthy);
                self.last_known_healthy.store(matches!(status.status, health::Status::Healthy), Ordering::SeqCst);
                status
            }
            Err(err) => {
                self.last_known_healthy.store(false, Ordering::SeqCst);
                health::critical(err.to_string())
            }
        }
    }

    /// Returns (creating and caching on first use) the collection handle
    /// for `bucket::scope::collection`, defaulting any blank segment to the
    /// manager's configured bucket/scope/collection. A given triple always
    /// resolves to the same handle.
    pub async fn get_collection(&self, bucket: Option<&str>, scope: Option<&str>, collection: Option<&str>) -> Result<Arc<dyn Collection>, CouchbaseCoreError> {
        let bucket = bucket.unwrap_or(&self.config.bucket);
        let scope = scope.unwrap_or(&self.config.scope);
        let collection = collection.unwrap_or(&self.config.collection);
        let key = format!("{bucket}::{scope}::{collection}");

        if let Some(existing) = self.collections.lock().expect("collections mutex poisoned").get(&key) {
            return Ok(Arc::clone(existing));
        }

        let guard = self.cluster.read().await;
        let cluster = guard.as_ref().ok_or_else(|| {
            CouchbaseCoreError::Driver(DriverError::new(ErrorKind::ServiceNotAvailable, "manager is closed"))
        })?;

        let bucket_handle = cluster.bucket(bucket).await?;
        let scope_handle = bucket_handle.scope(scope).await?;
        let collection_handle = scope_handle.collection(collection).await?;

        let mut collections = self.collections.lock().expect("collections mutex poisoned");
        let entry = collections.entry(key).or_insert_with(|| Arc::clone(&collection_handle));
        Ok(Arc::clone(entry))
    }

    /// The connected cluster handle, used by the query executor (C5) and
    /// transaction coordinator (C7).
    pub async fn cluster(&self) -> Result<Arc<dyn Cluster>, CouchbaseCoreError> {
        self.cluster
            .read()
            .await
            .clone()
            .ok_or_else(|| CouchbaseCoreError::Driver(DriverError::new(ErrorKind::ServiceNotAvailable, "manager is closed")))
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.breaker.current_state())
    }

    pub fn get_circuit_breaker_state(&self) -> CircuitState {
        self.breaker.current_state()
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Runs `operation` through the circuit breaker, failing fast while
    /// open, and retries classifier-retryable failures with the breaker
    /// re-checked on every attempt. `ctx.max_attempts` defaults to
    /// [`DEFAULT_MAX_ATTEMPTS`]. A successful attempt updates the rolling
    /// query-time average; exhaustion increments the failed-query counter
    /// and re-raises the last observed error unchanged.
    pub async fn execute_with_retry<T, Fut, Op>(&self, ctx: RetryContext, mut operation: Op) -> Result<T, CouchbaseCoreError>
    where
        T: Send,
        Fut: Future<Output = Result<T, CouchbaseCoreError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let max_attempts = ctx.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1);

        for attempt in 1..=max_attempts {
            self.metrics.record_query_attempt();
            let start = Instant::now();
            let result = self.breaker.execute(|| operation()).await;

            match result {
                Ok(value) => {
                    self.metrics.record_query_duration(start.elapsed());
                    return Ok(value);
                }
                Err(err) => {
                    if err.is_circuit_open() {
                        return Err(err);
                    }

                    let classification = err.kind().map(classify_kind);
                    let retryable = classification.as_ref().is_some_and(|c| c.is_retryable());
                    if !retryable || attempt == max_attempts {
                        self.metrics.record_query_failure();
                        return Err(err);
                    }

                    let delay = classification
                        .and_then(|c| c.retry.to_backoff())
                        .map(|b| b.delay(attempt))
                        .unwrap_or(Duration::from_millis(50));
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying operation");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("loop always returns before exhausting max_attempts")
    }

    /// Closes the underlying cluster connection and stops the health
    /// timer. Idempotent: a second call is a no-op.
    pub async fn close(&self) -> Result<(), CouchbaseCoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self.health_task.lock().expect("health task mutex poisoned").take() {
            handle.abort();
        }

        let cluster = self.cluster.write().await.take();
        if let Some(cluster) = cluster {
            cluster.close().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CouchbaseConfigBuilder;
    use crate::driver::stub::StubDriver;

    fn test_config() -> CouchbaseConfig {
        CouchbaseConfigBuilder::new()
            .connection_string("couchbase://localhost")
            .bucket("default")
            .build()
            .unwrap()
    }

    #[test]
    fn connect_backoff_never_exceeds_cap_plus_jitter() {
        for attempt in 1..=6 {
            let delay = connect_backoff(attempt);
            assert!(delay <= Duration::from_millis(10_000), "attempt {attempt} produced {delay:?}");
        }
    }

    #[tokio::test]
    async fn get_collection_caches_by_composite_key() {
        let driver: Arc<dyn Driver> = Arc::new(StubDriver::new());
        let config = test_config();
        let meta = crate::config::ConnectionStringMeta::parse(&config.connection_string).unwrap();
        let profile = build_connection_profile(&config, &meta);
        let cluster = driver.connect(&config.connection_string, profile.connect_options.clone()).await.unwrap();

        let manager = ConnectionManager {
            driver,
            config,
            profile,
            cluster: RwLock::new(Some(cluster)),
            collections: Mutex::new(HashMap::new()),
            metrics: ConnectionMetrics::new(),
            breaker: CircuitBreakerPolicy::new(5, Duration::from_secs(60)),
            health_task: Mutex::new(None),
            last_known_healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        };

        let a = manager.get_collection(None, None, None).await.unwrap();
        let b = manager.get_collection(None, None, None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn execute_with_retry_fast_fails_when_breaker_open() {
        let driver: Arc<dyn Driver> = Arc::new(StubDriver::new());
        let config = test_config();
        let meta = crate::config::ConnectionStringMeta::parse(&config.connection_string).unwrap();
        let profile = build_connection_profile(&config, &meta);
        let cluster = driver.connect(&config.connection_string, profile.connect_options.clone()).await.unwrap();

        let manager = ConnectionManager {
            driver,
            config,
            profile,
            cluster: RwLock::new(Some(cluster)),
            collections: Mutex::new(HashMap::new()),
            metrics: ConnectionMetrics::new(),
            breaker: CircuitBreakerPolicy::new(1, Duration::from_secs(30)),
            health_task: Mutex::new(None),
            last_known_healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        };
        manager.breaker.force_open();

        let result = manager
            .execute_with_retry(RetryContext::default(), || async { Ok::<_, CouchbaseCoreError>(1) })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
    }
}
