//! Telemetry sinks. Every public component (C2, C4-C7) reports a
//! [`CouchbaseEvent`] through a `TelemetrySink`; callers pick how (or
//! whether) those events leave the process.

use super::events::CouchbaseEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A destination for [`CouchbaseEvent`]s. Implementations must not block
/// the caller for long — a slow sink should buffer or drop, never stall
/// the operation that produced the event.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, event: CouchbaseEvent);
}

/// Discards every event. The default sink when no observability is wired
/// up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn emit(&self, _event: CouchbaseEvent) {}
}

/// Logs events through `tracing` at a level matched to severity: circuit
/// breaker opens and ambiguous outcomes at `warn`, everything else at
/// `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn emit(&self, event: CouchbaseEvent) {
        use super::events::{CircuitBreakerEvent, TransactionEvent};
        match &event {
            CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::Opened { failure_count }) => {
                tracing::warn!(failure_count, "circuit breaker opened");
            }
            CouchbaseEvent::Transaction(TransactionEvent::CommitAmbiguous { transaction_id }) => {
                tracing::warn!(transaction_id, "transaction commit ambiguous");
            }
            other => tracing::debug!(%other, "telemetry event"),
        }
    }
}

/// Retains the last `capacity` events in memory, for tests and
/// short-lived diagnostics. Evictions past capacity are counted, not
/// silently dropped.
pub struct MemorySink {
    capacity: usize,
    events: Mutex<Vec<CouchbaseEvent>>,
    evicted: AtomicUsize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), events: Mutex::new(Vec::new()), evicted: AtomicUsize::new(0) }
    }

    pub fn events(&self) -> Vec<CouchbaseEvent> {
        self.events.lock().expect("memory sink mutex poisoned").clone()
    }

    pub fn evicted(&self) -> usize {
        self.evicted.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.events.lock().expect("memory sink mutex poisoned").clear();
        self.evicted.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn emit(&self, event: CouchbaseEvent) {
        let mut events = self.events.lock().expect("memory sink mutex poisoned");
        if events.len() >= self.capacity {
            events.remove(0);
            self.evicted.fetch_add(1, Ordering::SeqCst);
        }
        events.push(event);
    }
}

/// Emits to every wrapped sink; no sink's failure can stop another from
/// seeing the event since `emit` is infallible.
pub struct MulticastSink {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl MulticastSink {
    pub fn new(sinks: Vec<Box<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl TelemetrySink for MulticastSink {
    async fn emit(&self, event: CouchbaseEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::{CircuitBreakerEvent, KvEvent};
    use std::time::Duration;

    #[tokio::test]
    async fn null_sink_drops_everything() {
        let sink = NullSink;
        sink.emit(CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::Closed)).await;
    }

    #[tokio::test]
    async fn memory_sink_records_events_in_order() {
        let sink = MemorySink::new(10);
        sink.emit(CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::Opened { failure_count: 5 })).await;
        sink.emit(CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpen)).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpen));
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest_past_capacity() {
        let sink = MemorySink::new(2);
        for i in 0..3 {
            sink.emit(CouchbaseEvent::Kv(KvEvent::Executed { verb: "get", duration: Duration::from_millis(i) }))
                .await;
        }

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn multicast_sink_fans_out_to_all_children() {
        let a = std::sync::Arc::new(MemorySink::new(10));
        let b = std::sync::Arc::new(MemorySink::new(10));

        struct ArcSink(std::sync::Arc<MemorySink>);
        #[async_trait]
        impl TelemetrySink for ArcSink {
            async fn emit(&self, event: CouchbaseEvent) {
                self.0.emit(event).await;
            }
        }

        let multicast = MulticastSink::new(vec![Box::new(ArcSink(a.clone())), Box::new(ArcSink(b.clone()))]);
        multicast.emit(CouchbaseEvent::CircuitBreaker(CircuitBreakerEvent::Closed)).await;

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }
}
