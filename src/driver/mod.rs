//! C8 — Driver trait boundary.
//!
//! The rest of this crate is the resilience/orchestration layer around an
//! opaque database driver, treated as a black box. This module turns that
//! boundary into explicit Rust traits so C4-C7 compile against a contract
//! instead
//! of a concrete network client, and so tests substitute [`stub`] for a
//! real one. It carries no behavior of its own.

pub mod stub;

use crate::error::{Cas, CouchbaseCoreError, DocumentId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Durability guarantee requested by a write (KVUpsertOptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    None,
    Majority,
    MajorityAndPersistActive,
    PersistToMajority,
}

/// Scan consistency requested by a query (QueryOptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanConsistency {
    NotBounded,
    #[default]
    RequestPlus,
    AtPlus,
}

/// Services the health probe (C4) and connect options (C3) know about.
/// Only `KeyValue` and `Query` are actually probed;
/// the rest exist for forward compatibility with the driver contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    KeyValue,
    Query,
    Analytics,
    Search,
    View,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KvGetOptions {
    pub project: Vec<String>,
    pub with_expiry: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct KvWriteOptions {
    pub durability: Durability,
    pub expiry: Option<Duration>,
    pub cas: Option<Cas>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub value: Value,
    pub cas: Cas,
    pub expiry: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MutationResult {
    pub cas: Cas,
}

/// A single subdocument operation composed into one `mutate_in` call,
/// built as a plain sequence with no fluent hidden state.
#[derive(Debug, Clone)]
pub struct SubdocOperation {
    pub op: SubdocVerb,
    pub path: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdocVerb {
    Upsert,
    Insert,
    Replace,
    Remove,
    ArrayAppend,
    ArrayPrepend,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
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

#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    pub execution_time: Option<Duration>,
    pub result_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub rows: Vec<Value>,
    pub metrics: Option<QueryMetrics>,
}

#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub state_ok: bool,
    pub latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct PingResult {
    pub id: String,
    pub services: HashMap<ServiceKind, Vec<EndpointHealth>>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub kv_timeout: Duration,
    pub kv_durable_timeout: Duration,
    pub query_timeout: Duration,
    pub tls: bool,
}

/// Top of the driver contract: connects and yields a [`Cluster`] handle.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        options: ConnectOptions,
    ) -> Result<std::sync::Arc<dyn Cluster>, CouchbaseCoreError>;
}

#[async_trait]
pub trait Cluster: Send + Sync {
    async fn bucket(&self, name: &str) -> Result<std::sync::Arc<dyn Bucket>, CouchbaseCoreError>;
    async fn query(&self, statement: &str, options: QueryOptions) -> Result<QueryResponse, CouchbaseCoreError>;
    async fn begin_transaction(&self) -> Result<std::sync::Arc<dyn Transaction>, CouchbaseCoreError>;
    async fn close(&self) -> Result<(), CouchbaseCoreError>;
}

#[async_trait]
pub trait Bucket: Send + Sync {
    async fn scope(&self, name: &str) -> Result<std::sync::Arc<dyn Scope>, CouchbaseCoreError>;
    async fn get_all_scopes(&self) -> Result<Vec<String>, CouchbaseCoreError>;
    async fn ping(&self, services: &[ServiceKind], timeout: Duration) -> Result<PingResult, CouchbaseCoreError>;
}

#[async_trait]
pub trait Scope: Send + Sync {
    async fn collection(&self, name: &str) -> Result<std::sync::Arc<dyn Collection>, CouchbaseCoreError>;
}

/// KV/subdocument verbs . `get`/`get_and_lock`/`lookup_in`
/// return `Ok(None)` on `DocumentNotFound` rather than an error; every
/// other error kind propagates.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn get(&self, id: &DocumentId, opts: &KvGetOptions) -> Result<Option<GetResult>, CouchbaseCoreError>;
    async fn insert(&self, id: &DocumentId, value: Value, opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError>;
    async fn upsert(&self, id: &DocumentId, value: Value, opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError>;
    async fn replace(&self, id: &DocumentId, value: Value, opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError>;
    async fn remove(&self, id: &DocumentId, cas: Option<Cas>) -> Result<(), CouchbaseCoreError>;
    async fn exists(&self, id: &DocumentId) -> Result<bool, CouchbaseCoreError>;
    async fn get_and_lock(&self, id: &DocumentId, lock_time: Duration) -> Result<Option<GetResult>, CouchbaseCoreError>;
    async fn unlock(&self, id: &DocumentId, cas: Cas) -> Result<(), CouchbaseCoreError>;
    async fn touch(&self, id: &DocumentId, expiry: Duration) -> Result<(), CouchbaseCoreError>;
    async fn mutate_in(
        &self,
        id: &DocumentId,
        ops: Vec<SubdocOperation>,
        opts: &KvWriteOptions,
    ) -> Result<MutationResult, CouchbaseCoreError>;
    async fn lookup_in(
        &self,
        id: &DocumentId,
        paths: Vec<String>,
    ) -> Result<Option<HashMap<String, Value>>, CouchbaseCoreError>;
}

/// A single transaction attempt, scoped to one [`Cluster::begin_transaction`]
/// call. The transaction coordinator (C7) drives `get`/`insert`/`replace`/
/// `remove` inside a user closure, then calls `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn id(&self) -> &str;
    async fn get(
        &self,
        collection: &dyn Collection,
        id: &DocumentId,
    ) -> Result<Option<GetResult>, CouchbaseCoreError>;
    async fn insert(
        &self,
        collection: &dyn Collection,
        id: &DocumentId,
        value: Value,
    ) -> Result<(), CouchbaseCoreError>;
    async fn replace(
        &self,
        collection: &dyn Collection,
        id: &DocumentId,
        cas: Cas,
        value: Value,
    ) -> Result<(), CouchbaseCoreError>;
    async fn remove(
        &self,
        collection: &dyn Collection,
        id: &DocumentId,
        cas: Cas,
    ) -> Result<(), CouchbaseCoreError>;
    async fn commit(&self) -> Result<(), CouchbaseCoreError>;
    async fn rollback(&self) -> Result<(), CouchbaseCoreError>;
}
