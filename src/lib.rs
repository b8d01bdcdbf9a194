#![forbid(unsafe_code)]

//! A resilience and orchestration layer around a Couchbase driver: error
//! classification, a lock-free circuit breaker, connection lifecycle
//! management, and retry-aware query/KV/transaction executors, all built
//! against an explicit [`driver::Driver`] trait boundary rather than a
//! concrete network client.
//!
//! ## Quick Start
//!
//! ```rust
//! use couchbase_core::{
//!     config::CouchbaseConfigBuilder,
//!     driver::stub::StubDriver,
//!     driver::Driver,
//!     kv, manager::ConnectionManager,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), couchbase_core::CouchbaseCoreError> {
//! let config = CouchbaseConfigBuilder::new()
//!     .connection_string("couchbase://localhost")
//!     .bucket("default")
//!     .build()
//!     .expect("valid config");
//!
//! let driver: Arc<dyn Driver> = Arc::new(StubDriver::new());
//! let manager = ConnectionManager::initialize(driver, config).await?;
//!
//! let collection = manager.get_collection(None, None, None).await?;
//! let id = "user::1".into();
//! kv::upsert(collection.as_ref(), &id, serde_json::json!({"name": "ada"}), Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod jitter;
pub mod kv;
pub mod manager;
pub mod metrics;
pub mod options;
pub mod query;
pub mod retry;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;
pub mod transactions;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerStats, CircuitState};
pub use classify::{classify, classify_kind, ErrorCategory, ErrorClassification, Disposition, RetryStrategy, Severity};
pub use clock::{Clock, MonotonicClock};
pub use config::{CouchbaseConfig, CouchbaseConfigBuilder, ConfigError, ConnectionStringMeta};
pub use error::{Cas, CouchbaseCoreError, DocumentId, DriverError, ErrorContext, ErrorKind};
pub use health::{HealthStatus, Status as HealthState};
pub use jitter::Jitter;
pub use manager::{ConnectionManager, RetryContext};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use options::{build_connection_profile, ConnectionProfile};
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{TimeoutConfigError, TimeoutPolicy, MAX_TIMEOUT};
