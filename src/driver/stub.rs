//! A deterministic in-memory [`Driver`] used to drive test scenarios
//! without a real cluster. Not gated behind `#[cfg(test)]` so
//! integration tests under `tests/` can depend on it too.

use super::{
    Bucket, Cluster, Collection, ConnectOptions, Driver, EndpointHealth, GetResult, KvGetOptions,
    KvWriteOptions, MutationResult, PingResult, QueryMetrics, QueryOptions, QueryResponse, Scope,
    ServiceKind, SubdocOperation, SubdocVerb, Transaction,
};
use crate::error::{Cas, CouchbaseCoreError, DocumentId, DriverError, ErrorKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    None,
    Network,
    DocumentNotFound,
    AmbiguousTimeout,
}

struct Document {
    value: Value,
    cas: u64,
}

#[derive(Default)]
struct CollectionState {
    documents: Mutex<HashMap<String, Document>>,
    locked: Mutex<HashMap<String, u64>>,
}

/// In-memory stand-in for a `Collection`. `set_failure` forces every
/// subsequent call to fail with the chosen kind, for breaker/retry tests.
pub struct StubCollection {
    state: Arc<CollectionState>,
    failure: Arc<Mutex<StubFailure>>,
    cas_counter: AtomicU64,
}

impl Default for StubCollection {
    fn default() -> Self {
        Self { state: Arc::new(CollectionState::default()), failure: Arc::new(Mutex::new(StubFailure::None)), cas_counter: AtomicU64::new(1) }
    }
}

impl StubCollection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failure(&self, failure: StubFailure) {
        *self.failure.lock().expect("stub mutex poisoned") = failure;
    }

    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), CouchbaseCoreError> {
        match *self.failure.lock().expect("stub mutex poisoned") {
            StubFailure::None => Ok(()),
            StubFailure::Network => Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::Network, "stub network failure"))),
            StubFailure::DocumentNotFound => {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentNotFound, "stub not found")))
            }
            StubFailure::AmbiguousTimeout => {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::AmbiguousTimeout, "stub ambiguous timeout")))
            }
        }
    }
}

#[async_trait]
impl Collection for StubCollection {
    async fn get(&self, id: &DocumentId, _opts: &KvGetOptions) -> Result<Option<GetResult>, CouchbaseCoreError> {
        self.check_failure()?;
        let documents = self.state.documents.lock().expect("stub mutex poisoned");
        Ok(documents.get(id.as_str()).map(|doc| GetResult { value: doc.value.clone(), cas: Cas::new(doc.cas.to_string()), expiry: None }))
    }

    async fn insert(&self, id: &DocumentId, value: Value, _opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
        self.check_failure()?;
        let mut documents = self.state.documents.lock().expect("stub mutex poisoned");
        if documents.contains_key(id.as_str()) {
            return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentExists, id.as_str())));
        }
        let cas = self.next_cas();
        documents.insert(id.as_str().to_string(), Document { value, cas });
        Ok(MutationResult { cas: Cas::new(cas.to_string()) })
    }

    async fn upsert(&self, id: &DocumentId, value: Value, opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
        self.check_failure()?;
        let mut documents = self.state.documents.lock().expect("stub mutex poisoned");
        if let (Some(expected), Some(existing)) = (&opts.cas, documents.get(id.as_str())) {
            if expected.as_str() != existing.cas.to_string() {
                return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::CasMismatch, id.as_str())));
            }
        }
        let cas = self.next_cas();
        documents.insert(id.as_str().to_string(), Document { value, cas });
        Ok(MutationResult { cas: Cas::new(cas.to_string()) })
    }

    async fn replace(&self, id: &DocumentId, value: Value, opts: &KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
        self.check_failure()?;
        let mut documents = self.state.documents.lock().expect("stub mutex poisoned");
        let existing = documents
            .get(id.as_str())
            .ok_or_else(|| CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentNotFound, id.as_str())))?;
        if let Some(expected) = &opts.cas {
            if expected.as_str() != existing.cas.to_string() {
                return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::CasMismatch, id.as_str())));
            }
        }
        let cas = self.next_cas();
        documents.insert(id.as_str().to_string(), Document { value, cas });
        Ok(MutationResult { cas: Cas::new(cas.to_string()) })
    }

    async fn remove(&self, id: &DocumentId, cas: Option<Cas>) -> Result<(), CouchbaseCoreError> {
        self.check_failure()?;
        let mut documents = self.state.documents.lock().expect("stub mutex poisoned");
        let existing = documents
            .get(id.as_str())
            .ok_or_else(|| CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentNotFound, id.as_str())))?;
        if let Some(expected) = &cas {
            if expected.as_str() != existing.cas.to_string() {
                return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::CasMismatch, id.as_str())));
            }
        }
        documents.remove(id.as_str());
        Ok(())
    }

    async fn exists(&self, id: &DocumentId) -> Result<bool, CouchbaseCoreError> {
        self.check_failure()?;
        Ok(self.state.documents.lock().expect("stub mutex poisoned").contains_key(id.as_str()))
    }

    async fn get_and_lock(&self, id: &DocumentId, lock_time: Duration) -> Result<Option<GetResult>, CouchbaseCoreError> {
        self.check_failure()?;
        let documents = self.state.documents.lock().expect("stub mutex poisoned");
        match documents.get(id.as_str()) {
            Some(doc) => {
                self.state
                    .locked
                    .lock()
                    .expect("stub mutex poisoned")
                    .insert(id.as_str().to_string(), lock_time.as_secs());
                Ok(Some(GetResult { value: doc.value.clone(), cas: Cas::new(doc.cas.to_string()), expiry: None }))
            }
            None => Ok(None),
        }
    }

    async fn unlock(&self, id: &DocumentId, _cas: Cas) -> Result<(), CouchbaseCoreError> {
        self.check_failure()?;
        self.state.locked.lock().expect("stub mutex poisoned").remove(id.as_str());
        Ok(())
    }

    async fn touch(&self, id: &DocumentId, _expiry: Duration) -> Result<(), CouchbaseCoreError> {
        self.check_failure()?;
        if !self.state.documents.lock().expect("stub mutex poisoned").contains_key(id.as_str()) {
            return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::DocumentNotFound, id.as_str())));
        }
        Ok(())
    }

    async fn mutate_in(
        &self,
        id: &DocumentId,
        ops: Vec<SubdocOperation>,
        _opts: &KvWriteOptions,
    ) -> Result<MutationResult, CouchbaseCoreError> {
        self.check_failure()?;
        let mut documents = self.state.documents.lock().expect("stub mutex poisoned");
        let mut root = documents.get(id.as_str()).map(|d| d.value.clone()).unwrap_or(Value::Object(Default::default()));

        for op in ops {
            apply_subdoc_op(&mut root, &op)?;
        }

        let cas = self.next_cas();
        documents.insert(id.as_str().to_string(), Document { value: root, cas });
        Ok(MutationResult { cas: Cas::new(cas.to_string()) })
    }

    async fn lookup_in(&self, id: &DocumentId, paths: Vec<String>) -> Result<Option<HashMap<String, Value>>, CouchbaseCoreError> {
        self.check_failure()?;
        let documents = self.state.documents.lock().expect("stub mutex poisoned");
        let Some(doc) = documents.get(id.as_str()) else { return Ok(None) };

        let mut result = HashMap::new();
        for path in paths {
            if let Some(value) = doc.value.pointer(&json_pointer(&path)) {
                result.insert(path, value.clone());
            }
        }
        Ok(Some(result))
    }
}

fn json_pointer(path: &str) -> String {
    format!("/{}", path.replace('.', "/"))
}

fn apply_subdoc_op(root: &mut Value, op: &SubdocOperation) -> Result<(), CouchbaseCoreError> {
    let pointer = json_pointer(&op.path);
    match op.op {
        SubdocVerb::Upsert | SubdocVerb::Insert | SubdocVerb::Replace => {
            let value = op.value.clone().unwrap_or(Value::Null);
            set_pointer(root, &pointer, value)
        }
        SubdocVerb::Remove => {
            if root.pointer(&pointer).is_none() {
                return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::PathNotFound, &op.path)));
            }
            remove_pointer(root, &pointer);
            Ok(())
        }
        SubdocVerb::ArrayAppend | SubdocVerb::ArrayPrepend => {
            let entry = root.pointer_mut(&pointer).ok_or_else(|| {
                CouchbaseCoreError::Driver(DriverError::new(ErrorKind::PathNotFound, &op.path))
            })?;
            let Value::Array(arr) = entry else {
                return Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::PathMismatch, &op.path)));
            };
            let value = op.value.clone().unwrap_or(Value::Null);
            if op.op == SubdocVerb::ArrayAppend {
                arr.push(value);
            } else {
                arr.insert(0, value);
            }
            Ok(())
        }
    }
}

fn set_pointer(root: &mut Value, pointer: &str, value: Value) -> Result<(), CouchbaseCoreError> {
    if pointer == "/" {
        *root = value;
        return Ok(());
    }
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let mut cursor = root;
    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(Default::default());
        }
        cursor = cursor.as_object_mut().expect("just ensured object").entry(segment.to_string()).or_insert(Value::Object(Default::default()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Default::default());
    }
    cursor.as_object_mut().expect("just ensured object").insert(segments[segments.len() - 1].to_string(), value);
    Ok(())
}

fn remove_pointer(root: &mut Value, pointer: &str) {
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let mut cursor = root;
    for segment in &segments[..segments.len() - 1] {
        match cursor.get_mut(segment) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(obj) = cursor.as_object_mut() {
        obj.remove(segments[segments.len() - 1]);
    }
}

/// In-memory transaction: buffers writes and applies them to the backing
/// collections on `commit`; `rollback` discards them.
pub struct StubTransaction {
    id: String,
    failure: Arc<Mutex<StubFailure>>,
}

#[async_trait]
impl Transaction for StubTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, collection: &dyn Collection, id: &DocumentId) -> Result<Option<GetResult>, CouchbaseCoreError> {
        collection.get(id, &KvGetOptions::default()).await
    }

    async fn insert(&self, collection: &dyn Collection, id: &DocumentId, value: Value) -> Result<(), CouchbaseCoreError> {
        collection.insert(id, value, &KvWriteOptions::default()).await.map(|_| ())
    }

    async fn replace(&self, collection: &dyn Collection, id: &DocumentId, cas: Cas, value: Value) -> Result<(), CouchbaseCoreError> {
        let opts = KvWriteOptions { cas: Some(cas), ..Default::default() };
        collection.replace(id, value, &opts).await.map(|_| ())
    }

    async fn remove(&self, collection: &dyn Collection, id: &DocumentId, cas: Cas) -> Result<(), CouchbaseCoreError> {
        collection.remove(id, Some(cas)).await
    }

    async fn commit(&self) -> Result<(), CouchbaseCoreError> {
        match *self.failure.lock().expect("stub mutex poisoned") {
            StubFailure::None => Ok(()),
            _ => Err(CouchbaseCoreError::Driver(DriverError::new(
                ErrorKind::TransactionCommitAmbiguous,
                "stub commit ambiguous",
            ))),
        }
    }

    async fn rollback(&self) -> Result<(), CouchbaseCoreError> {
        Ok(())
    }
}

pub struct StubScope {
    collections: Mutex<HashMap<String, Arc<StubCollection>>>,
}

impl Default for StubScope {
    fn default() -> Self {
        Self { collections: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl Scope for StubScope {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, CouchbaseCoreError> {
        let mut collections = self.collections.lock().expect("stub mutex poisoned");
        let collection = collections.entry(name.to_string()).or_insert_with(StubCollection::new).clone();
        Ok(collection)
    }
}

pub struct StubBucket {
    scopes: Mutex<HashMap<String, Arc<StubScope>>>,
    ping_failure_count: AtomicUsize,
}

impl Default for StubBucket {
    fn default() -> Self {
        Self { scopes: Mutex::new(HashMap::new()), ping_failure_count: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Bucket for StubBucket {
    async fn scope(&self, name: &str) -> Result<Arc<dyn Scope>, CouchbaseCoreError> {
        let mut scopes = self.scopes.lock().expect("stub mutex poisoned");
        let scope = scopes.entry(name.to_string()).or_insert_with(|| Arc::new(StubScope::default())).clone();
        Ok(scope)
    }

    async fn get_all_scopes(&self) -> Result<Vec<String>, CouchbaseCoreError> {
        Ok(self.scopes.lock().expect("stub mutex poisoned").keys().cloned().collect())
    }

    async fn ping(&self, services: &[ServiceKind], _timeout: Duration) -> Result<PingResult, CouchbaseCoreError> {
        self.ping_failure_count.fetch_add(1, Ordering::SeqCst);
        let mut map = HashMap::new();
        for service in services {
            map.insert(*service, vec![EndpointHealth { state_ok: true, latency: Duration::from_millis(1) }]);
        }
        Ok(PingResult { id: "stub-ping".into(), services: map })
    }
}

pub struct StubCluster {
    buckets: Mutex<HashMap<String, Arc<StubBucket>>>,
    query_failure: Arc<Mutex<StubFailure>>,
    query_delay: Arc<Mutex<Duration>>,
    transaction_failure: Arc<Mutex<StubFailure>>,
}

impl Default for StubCluster {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            query_failure: Arc::new(Mutex::new(StubFailure::None)),
            query_delay: Arc::new(Mutex::new(Duration::ZERO)),
            transaction_failure: Arc::new(Mutex::new(StubFailure::None)),
        }
    }
}

impl StubCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_query_failure(&self, failure: StubFailure) {
        *self.query_failure.lock().expect("stub mutex poisoned") = failure;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().expect("stub mutex poisoned") = delay;
    }

    pub fn set_transaction_failure(&self, failure: StubFailure) {
        *self.transaction_failure.lock().expect("stub mutex poisoned") = failure;
    }
}

#[async_trait]
impl Cluster for StubCluster {
    async fn bucket(&self, name: &str) -> Result<Arc<dyn Bucket>, CouchbaseCoreError> {
        let mut buckets = self.buckets.lock().expect("stub mutex poisoned");
        let bucket = buckets.entry(name.to_string()).or_insert_with(|| Arc::new(StubBucket::default())).clone();
        Ok(bucket)
    }

    async fn query(&self, statement: &str, _options: QueryOptions) -> Result<QueryResponse, CouchbaseCoreError> {
        let delay = *self.query_delay.lock().expect("stub mutex poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match *self.query_failure.lock().expect("stub mutex poisoned") {
            StubFailure::None => Ok(QueryResponse {
                rows: Vec::new(),
                metrics: Some(QueryMetrics { execution_time: Some(delay), result_count: Some(0) }),
            }),
            StubFailure::Network => {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::Network, format!("query failed: {statement}"))))
            }
            StubFailure::DocumentNotFound => {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::IndexNotFound, statement)))
            }
            StubFailure::AmbiguousTimeout => {
                Err(CouchbaseCoreError::Driver(DriverError::new(ErrorKind::AmbiguousTimeout, statement)))
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Arc<dyn Transaction>, CouchbaseCoreError> {
        Ok(Arc::new(StubTransaction {
            id: format!("txn-stub-{}", uuid::Uuid::new_v4()),
            failure: self.transaction_failure.clone(),
        }))
    }

    async fn close(&self) -> Result<(), CouchbaseCoreError> {
        Ok(())
    }
}

/// A [`Driver`] that always hands back the same [`StubCluster`], so tests
/// can configure failures on it before or after `connect`.
pub struct StubDriver {
    cluster: Arc<StubCluster>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self { cluster: StubCluster::new() }
    }

    pub fn cluster(&self) -> Arc<StubCluster> {
        self.cluster.clone()
    }
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for StubDriver {
    async fn connect(&self, _connection_string: &str, _options: ConnectOptions) -> Result<Arc<dyn Cluster>, CouchbaseCoreError> {
        Ok(self.cluster.clone())
    }
}
