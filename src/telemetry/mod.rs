//! Telemetry and observability for the resilience and orchestration layer.
//!
//! This module provides the event system that lets the circuit breaker
//! (C2), connection manager (C4), query executor (C5), KV operations
//! (C6), and transaction coordinator (C7) all emit structured telemetry
//! through one `TelemetrySink` trait. Events flow through sink
//! implementations which can log, buffer, or fan out to multiple
//! destinations.
//!
//! # Event types
//!
//! - **Connection**: `Connected`, `Closed`, `HealthCheckFailed`
//! - **Circuit breaker**: `Opened`, `HalfOpen`, `Closed`
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Query**: `Slow`
//! - **KV**: `Executed`
//! - **Transaction**: `Retried`, `Committed`, `CommitAmbiguous`

pub mod events;
pub mod sinks;

pub use events::{
    CircuitBreakerEvent, ConnectionEvent, CouchbaseEvent, KvEvent, QueryEvent, RetryEvent,
    TransactionEvent,
};
pub use sinks::{LogSink, MemorySink, MulticastSink, NullSink, TelemetrySink};

#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
