//! C3 — Connection Options Builder.
//!
//! Turns a validated [`CouchbaseConfig`] plus its derived
//! [`ConnectionStringMeta`] into the driver's [`ConnectOptions`] record:
//! timeouts with defaults, compression, threshold/orphan logging,
//! transaction defaults, TLS/profile selection.

use crate::config::{CouchbaseConfig, ConnectionStringMeta};
use crate::driver::{ConnectOptions, Durability};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanLogging {
    pub enabled: bool,
    pub sample_size: usize,
    pub interval: Duration,
}

impl Default for OrphanLogging {
    fn default() -> Self {
        Self { enabled: true, sample_size: 10, interval: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDefaults {
    pub cleanup_window: Duration,
    pub durability: Durability,
    pub timeout: Duration,
}

impl Default for TransactionDefaults {
    fn default() -> Self {
        Self { cleanup_window: Duration::from_secs(60), durability: Durability::Majority, timeout: Duration::from_secs(15) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityOptions {
    pub tls: bool,
    pub verify_certificates: bool,
    pub trust_system_store: bool,
}

/// Everything derived from config + connection-string metadata that the
/// driver's `connect` needs beyond the plain [`ConnectOptions`] the
/// `Driver` trait takes. Kept separate so the trait boundary (C8) stays a
/// thin plumbing layer while this carries the spec's policy defaults.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    pub connect_options: ConnectOptions,
    pub orphan_logging: OrphanLogging,
    pub transaction_defaults: TransactionDefaults,
    pub security: SecurityOptions,
    pub wan_development_profile: bool,
}

/// Builds a [`ConnectionProfile`] from a config and its parsed connection
/// string, applying the production/Capella rules in 
pub fn build_connection_profile(config: &CouchbaseConfig, meta: &ConnectionStringMeta) -> ConnectionProfile {
    let mut timeouts = config.timeouts.clone();

    if meta.is_capella {
        timeouts.connect = Duration::from_secs(15);
        timeouts.bootstrap = Duration::from_secs(25);
        timeouts.kv = Duration::from_secs(10);
        timeouts.query = Duration::from_secs(45);
    }

    let connect_options = ConnectOptions {
        username: config.username.clone(),
        password: config.password.clone(),
        connect_timeout: timeouts.connect,
        bootstrap_timeout: timeouts.bootstrap,
        kv_timeout: timeouts.kv,
        kv_durable_timeout: timeouts.kv_durable,
        query_timeout: timeouts.query,
        tls: meta.is_tls,
    };

    // Disable certificate verification only outside production AND outside Capella.
    let verify_certificates = config.production || meta.is_capella;

    let security = SecurityOptions { tls: meta.is_tls, verify_certificates, trust_system_store: meta.is_capella };

    ConnectionProfile {
        connect_options,
        orphan_logging: OrphanLogging::default(),
        transaction_defaults: TransactionDefaults::default(),
        security,
        wan_development_profile: meta.is_capella,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CouchbaseConfigBuilder;

    #[test]
    fn capella_overrides_default_timeouts() {
        let config = CouchbaseConfigBuilder::new()
            .connection_string("couchbases://my.cloud.couchbase.com")
            .bucket("default")
            .build()
            .unwrap();
        let meta = ConnectionStringMeta::parse(&config.connection_string).unwrap();

        let profile = build_connection_profile(&config, &meta);
        assert_eq!(profile.connect_options.connect_timeout, Duration::from_secs(15));
        assert_eq!(profile.connect_options.query_timeout, Duration::from_secs(45));
        assert!(profile.wan_development_profile);
    }

    #[test]
    fn non_capella_keeps_config_defaults() {
        let config = CouchbaseConfigBuilder::new()
            .connection_string("couchbase://localhost")
            .bucket("default")
            .build()
            .unwrap();
        let meta = ConnectionStringMeta::parse(&config.connection_string).unwrap();

        let profile = build_connection_profile(&config, &meta);
        assert_eq!(profile.connect_options.connect_timeout, Duration::from_secs(10));
        assert!(!profile.wan_development_profile);
        assert!(!profile.security.tls);
    }

    #[test]
    fn capella_trusts_system_store() {
        let config = CouchbaseConfigBuilder::new()
            .connection_string("couchbases://x.cloud.couchbase.com")
            .bucket("default")
            .build()
            .unwrap();
        let meta = ConnectionStringMeta::parse(&config.connection_string).unwrap();

        let profile = build_connection_profile(&config, &meta);
        assert!(profile.security.trust_system_store);
    }
}
