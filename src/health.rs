//! `HealthStatus` and the C4 health probe.

use crate::circuit_breaker::CircuitBreakerStats;
use crate::driver::{PingResult, ServiceKind};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
    Disconnected,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub endpoints: usize,
    pub healthy_endpoints: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthDetails {
    pub latency_millis: u64,
    pub services: HashMap<ServiceKind, ServiceHealth>,
    pub health_percentage: f64,
    pub breaker_stats: CircuitBreakerStats,
    pub diagnostic_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub timestamp_millis: u64,
    pub status: Status,
    pub error: Option<String>,
    pub details: Option<HealthDetails>,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Maps a health percentage to a [`Status`]: healthy at
/// 100%, degraded at 50%+, unhealthy below that.
fn status_for_percentage(percentage: f64) -> Status {
    if percentage >= 100.0 {
        Status::Healthy
    } else if percentage >= 50.0 {
        Status::Degraded
    } else {
        Status::Unhealthy
    }
}

/// Analyze a bucket ping against the services we actually probe
/// (KeyValue, Query) and produce a [`HealthStatus`].
///
/// `last_known_healthy` implements the no-endpoints edge case: when the
/// driver reports no endpoints at all
/// but the manager previously considered itself healthy, this reports
/// healthy rather than unhealthy — cloud deployments sometimes expose no
/// diagnostics even while serving traffic.
pub fn analyze_ping(
    ping: &PingResult,
    latency_millis: u64,
    breaker_stats: CircuitBreakerStats,
    last_known_healthy: bool,
) -> HealthStatus {
    let mut services = HashMap::new();
    let mut total = 0usize;
    let mut healthy = 0usize;

    for (service, endpoints) in &ping.services {
        let healthy_endpoints = endpoints.iter().filter(|e| e.state_ok || e.latency.as_millis() > 0).count();
        total += endpoints.len();
        healthy += healthy_endpoints;
        services.insert(
            *service,
            ServiceHealth { healthy: healthy_endpoints == endpoints.len() && !endpoints.is_empty(), endpoints: endpoints.len(), healthy_endpoints },
        );
    }

    let status = if total == 0 {
        if last_known_healthy {
            Status::Healthy
        } else {
            Status::Disconnected
        }
    } else {
        status_for_percentage((healthy as f64 / total as f64) * 100.0)
    };

    let health_percentage = if total == 0 { if last_known_healthy { 100.0 } else { 0.0 } } else { (healthy as f64 / total as f64) * 100.0 };

    HealthStatus {
        timestamp_millis: now_millis(),
        status,
        error: None,
        details: Some(HealthDetails {
            latency_millis,
            services,
            health_percentage,
            breaker_stats,
            diagnostic_id: ping.id.clone(),
        }),
    }
}

pub fn disconnected(reason: impl Into<String>) -> HealthStatus {
    HealthStatus { timestamp_millis: now_millis(), status: Status::Disconnected, error: Some(reason.into()), details: None }
}

pub fn critical(reason: impl Into<String>) -> HealthStatus {
    HealthStatus { timestamp_millis: now_millis(), status: Status::Critical, error: Some(reason.into()), details: None }
}
