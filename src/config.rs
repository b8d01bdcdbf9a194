//! CouchbaseConfig and connection-string parsing.
//!
//! `CouchbaseConfig` is produced once, outside this crate, by an external
//! config loader; `CouchbaseConfigBuilder` only validates and constructs
//! the typed value from raw fields, mirroring the
//! `CircuitBreakerConfig`/`RetryPolicyBuilder` fallible-builder idiom.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub bootstrap: Duration,
    pub resolve: Duration,
    pub kv: Duration,
    pub kv_durable: Duration,
    pub query: Duration,
    pub analytics: Duration,
    pub search: Duration,
    pub view: Duration,
    pub management: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            bootstrap: Duration::from_secs(20),
            resolve: Duration::from_secs(5),
            kv: Duration::from_millis(7_500),
            kv_durable: Duration::from_secs(15),
            query: Duration::from_secs(30),
            analytics: Duration::from_secs(60),
            search: Duration::from_secs(30),
            view: Duration::from_secs(30),
            management: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compression {
    pub enabled: bool,
    pub min_size: usize,
    pub min_ratio: f64,
}

impl Default for Compression {
    fn default() -> Self {
        Self { enabled: true, min_size: 32, min_ratio: 0.83 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdLogging {
    pub enabled: bool,
    pub kv: Duration,
    pub query: Duration,
    pub analytics: Duration,
    pub search: Duration,
    pub interval: Duration,
}

impl Default for ThresholdLogging {
    fn default() -> Self {
        Self {
            enabled: true,
            kv: Duration::from_millis(500),
            query: Duration::from_secs(1),
            analytics: Duration::from_secs(1),
            search: Duration::from_secs(1),
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub flags: Vec<String>,
}

/// Validated, immutable configuration (`CouchbaseConfig`).
/// Created once at process start by [`CouchbaseConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct CouchbaseConfig {
    pub connection_string: String,
    pub username: String,
    pub password: String,
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub trust_store_path: Option<String>,
    pub timeouts: Timeouts,
    pub compression: Compression,
    pub threshold_logging: ThresholdLogging,
    pub features: Features,
    /// Whether this deployment must satisfy the production validation
    /// rules in (TLS, non-default password, no localhost).
    pub production: bool,
}

/// Derived, pure-function-of-the-string metadata (
/// `ConnectionStringMeta`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStringMeta {
    pub is_tls: bool,
    pub is_capella: bool,
    pub is_dns_srv: bool,
    pub protocol: String,
    pub hosts: Vec<String>,
}

impl ConnectionStringMeta {
    /// Parse `couchbase[s]://host[,host...]`. Does not resolve DNS or
    /// validate host reachability — purely syntactic.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let (protocol, rest) = connection_string
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidConnectionString(connection_string.to_string()))?;

        if protocol != "couchbase" && protocol != "couchbases" {
            return Err(ConfigError::InvalidConnectionString(connection_string.to_string()));
        }

        let hosts: Vec<String> = rest
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        if hosts.is_empty() {
            return Err(ConfigError::InvalidConnectionString(connection_string.to_string()));
        }

        let is_tls = protocol == "couchbases";
        let is_capella = hosts.iter().any(|h| h.ends_with("cloud.couchbase.com"));
        let is_dns_srv = hosts.len() == 1 && !hosts[0].contains(':');

        Ok(Self { is_tls, is_capella, is_dns_srv, protocol: protocol.to_string(), hosts })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("bucket name must not be empty")]
    EmptyBucket,
    #[error("production deployments must use couchbases:// and a non-default password")]
    InsecureProductionConfig,
}

#[derive(Debug, Clone, Default)]
pub struct CouchbaseConfigBuilder {
    connection_string: Option<String>,
    username: Option<String>,
    password: Option<String>,
    bucket: Option<String>,
    scope: Option<String>,
    collection: Option<String>,
    trust_store_path: Option<String>,
    timeouts: Option<Timeouts>,
    compression: Compression,
    threshold_logging: ThresholdLogging,
    features: Features,
    production: bool,
}

impl CouchbaseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.connection_string = Some(value.into());
        self
    }

    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = Some(value.into());
        self
    }

    pub fn password(mut self, value: impl Into<String>) -> Self {
        self.password = Some(value.into());
        self
    }

    pub fn bucket(mut self, value: impl Into<String>) -> Self {
        self.bucket = Some(value.into());
        self
    }

    pub fn scope(mut self, value: impl Into<String>) -> Self {
        self.scope = Some(value.into());
        self
    }

    pub fn collection(mut self, value: impl Into<String>) -> Self {
        self.collection = Some(value.into());
        self
    }

    pub fn trust_store_path(mut self, value: impl Into<String>) -> Self {
        self.trust_store_path = Some(value.into());
        self
    }

    pub fn timeouts(mut self, value: Timeouts) -> Self {
        self.timeouts = Some(value);
        self
    }

    pub fn compression(mut self, value: Compression) -> Self {
        self.compression = value;
        self
    }

    pub fn threshold_logging(mut self, value: ThresholdLogging) -> Self {
        self.threshold_logging = value;
        self
    }

    pub fn production(mut self, value: bool) -> Self {
        self.production = value;
        self
    }

    /// Validate and build. Production deployments must use `couchbases://`
    /// with a non-default password and a non-localhost host (
    /// production validation rules).
    pub fn build(self) -> Result<CouchbaseConfig, ConfigError> {
        let connection_string = self
            .connection_string
            .ok_or_else(|| ConfigError::InvalidConnectionString(String::new()))?;
        let meta = ConnectionStringMeta::parse(&connection_string)?;

        let bucket = self.bucket.unwrap_or_default();
        if bucket.is_empty() {
            return Err(ConfigError::EmptyBucket);
        }

        let password = self.password.unwrap_or_default();

        if self.production && !meta.is_capella {
            let is_localhost = meta.hosts.iter().any(|h| h == "localhost" || h == "127.0.0.1");
            if meta.protocol != "couchbases" || password == "password" || is_localhost {
                return Err(ConfigError::InsecureProductionConfig);
            }
        }

        Ok(CouchbaseConfig {
            connection_string,
            username: self.username.unwrap_or_default(),
            password,
            bucket,
            scope: self.scope.unwrap_or_else(|| "_default".to_string()),
            collection: self.collection.unwrap_or_else(|| "_default".to_string()),
            trust_store_path: self.trust_store_path,
            timeouts: self.timeouts.unwrap_or_default(),
            compression: self.compression,
            threshold_logging: self.threshold_logging,
            features: self.features,
            production: self.production,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tls_and_plain_connection_strings() {
        let plain = ConnectionStringMeta::parse("couchbase://localhost").unwrap();
        assert!(!plain.is_tls);

        let tls = ConnectionStringMeta::parse("couchbases://cluster.example.com").unwrap();
        assert!(tls.is_tls);
    }

    #[test]
    fn detects_capella_by_hostname_suffix() {
        let meta = ConnectionStringMeta::parse("couchbases://my-cluster.cloud.couchbase.com").unwrap();
        assert!(meta.is_capella);
    }

    #[test]
    fn single_bare_host_is_dns_srv() {
        let meta = ConnectionStringMeta::parse("couchbase://mycluster").unwrap();
        assert!(meta.is_dns_srv);

        let multi = ConnectionStringMeta::parse("couchbase://a,b").unwrap();
        assert!(!multi.is_dns_srv);
    }

    #[test]
    fn builder_defaults_scope_and_collection() {
        let config = CouchbaseConfigBuilder::new()
            .connection_string("couchbase://localhost")
            .bucket("default")
            .build()
            .unwrap();

        assert_eq!(config.scope, "_default");
        assert_eq!(config.collection, "_default");
    }

    #[test]
    fn builder_rejects_empty_bucket() {
        let err = CouchbaseConfigBuilder::new()
            .connection_string("couchbase://localhost")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptyBucket);
    }

    #[test]
    fn production_requires_tls_and_strong_password() {
        let err = CouchbaseConfigBuilder::new()
            .connection_string("couchbase://localhost")
            .bucket("default")
            .password("password")
            .production(true)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InsecureProductionConfig);
    }

    #[test]
    fn production_accepts_tls_capella_and_real_password() {
        let config = CouchbaseConfigBuilder::new()
            .connection_string("couchbases://my-cluster.cloud.couchbase.com")
            .bucket("default")
            .password("s3cret")
            .production(true)
            .build()
            .unwrap();
        assert_eq!(config.bucket, "default");
    }
}
