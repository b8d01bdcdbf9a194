//! C6 — KV Operations. A thin wrapper over [`Collection`]
//! that applies a default KV timeout and adds batched
//! `get_multi`/`upsert_multi` with bounded concurrent fan-out.

use crate::driver::{Collection, GetResult, KvGetOptions, KvWriteOptions, MutationResult, SubdocOperation};
use crate::error::{Cas, CouchbaseCoreError, DocumentId};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default per-operation KV timeout (`Timeouts.kv`).
pub const DEFAULT_KV_TIMEOUT: Duration = Duration::from_millis(7_500);

/// Batch size used by `get_multi`/`upsert_multi` when the caller doesn't
/// override it.
pub const DEFAULT_BATCH_SIZE: usize = 100;

fn with_default_timeout(mut opts: KvGetOptions) -> KvGetOptions {
    if opts.timeout.is_none() {
        opts.timeout = Some(DEFAULT_KV_TIMEOUT);
    }
    opts
}

fn with_default_write_timeout(mut opts: KvWriteOptions) -> KvWriteOptions {
    if opts.timeout.is_none() {
        opts.timeout = Some(DEFAULT_KV_TIMEOUT);
    }
    opts
}

pub async fn get(collection: &dyn Collection, id: &DocumentId, opts: KvGetOptions) -> Result<Option<GetResult>, CouchbaseCoreError> {
    collection.get(id, &with_default_timeout(opts)).await
}

pub async fn insert(collection: &dyn Collection, id: &DocumentId, value: Value, opts: KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
    collection.insert(id, value, &with_default_write_timeout(opts)).await
}

pub async fn upsert(collection: &dyn Collection, id: &DocumentId, value: Value, opts: KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
    collection.upsert(id, value, &with_default_write_timeout(opts)).await
}

pub async fn replace(collection: &dyn Collection, id: &DocumentId, value: Value, opts: KvWriteOptions) -> Result<MutationResult, CouchbaseCoreError> {
    collection.replace(id, value, &with_default_write_timeout(opts)).await
}

pub async fn remove(collection: &dyn Collection, id: &DocumentId, cas: Option<Cas>) -> Result<(), CouchbaseCoreError> {
    collection.remove(id, cas).await
}

pub async fn exists(collection: &dyn Collection, id: &DocumentId) -> Result<bool, CouchbaseCoreError> {
    collection.exists(id).await
}

pub async fn get_and_lock(collection: &dyn Collection, id: &DocumentId, lock_time: Duration) -> Result<Option<GetResult>, CouchbaseCoreError> {
    collection.get_and_lock(id, lock_time).await
}

pub async fn unlock(collection: &dyn Collection, id: &DocumentId, cas: Cas) -> Result<(), CouchbaseCoreError> {
    collection.unlock(id, cas).await
}

pub async fn touch(collection: &dyn Collection, id: &DocumentId, expiry: Duration) -> Result<(), CouchbaseCoreError> {
    collection.touch(id, expiry).await
}

pub async fn mutate_in(
    collection: &dyn Collection,
    id: &DocumentId,
    ops: Vec<SubdocOperation>,
    opts: KvWriteOptions,
) -> Result<MutationResult, CouchbaseCoreError> {
    collection.mutate_in(id, ops, &with_default_write_timeout(opts)).await
}

pub async fn lookup_in(collection: &dyn Collection, id: &DocumentId, paths: Vec<String>) -> Result<Option<HashMap<String, Value>>, CouchbaseCoreError> {
    collection.lookup_in(id, paths).await
}

/// Result of [`upsert_multi`]: ids that upserted cleanly, and ids that
/// failed along with their error.
#[derive(Debug, Default)]
pub struct UpsertMultiResult {
    pub succeeded: Vec<DocumentId>,
    pub failed: Vec<(DocumentId, CouchbaseCoreError)>,
}

/// Fetches `ids` concurrently in batches of `batch_size` (default
/// [`DEFAULT_BATCH_SIZE`]). Returns a mapping of successfully-fetched ids
/// to their value; a missing document or a failed fetch is logged and
/// skipped rather than included. Batches run back to back with no
/// inter-batch delay.
pub async fn get_multi(
    collection: &Arc<dyn Collection>,
    ids: &[DocumentId],
    batch_size: Option<usize>,
) -> HashMap<DocumentId, GetResult> {
    let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
    let mut results = HashMap::with_capacity(ids.len());

    for chunk in ids.chunks(batch_size) {
        let futures = chunk.iter().map(|id| {
            let collection = Arc::clone(collection);
            let id = id.clone();
            async move {
                let result = collection.get(&id, &with_default_timeout(KvGetOptions::default())).await;
                (id, result)
            }
        });
        for (id, result) in join_all(futures).await {
            match result {
                Ok(Some(value)) => {
                    results.insert(id, value);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(document_id = %id, error = %err, "get_multi: skipping document after failure");
                }
            }
        }
    }

    results
}

/// Upserts `(id, value)` pairs concurrently in batches of `batch_size`
/// (default [`DEFAULT_BATCH_SIZE`]). Failures are logged and collected
/// into `failed` rather than aborting the remaining batch.
pub async fn upsert_multi(
    collection: &Arc<dyn Collection>,
    documents: Vec<(DocumentId, Value)>,
    batch_size: Option<usize>,
) -> UpsertMultiResult {
    let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
    let mut outcome = UpsertMultiResult::default();

    for chunk in documents.chunks(batch_size) {
        let futures = chunk.iter().cloned().map(|(id, value)| {
            let collection = Arc::clone(collection);
            async move {
                let result = collection.upsert(&id, value, &with_default_write_timeout(KvWriteOptions::default())).await;
                (id, result)
            }
        });
        for (id, result) in join_all(futures).await {
            match result {
                Ok(_) => outcome.succeeded.push(id),
                Err(err) => {
                    tracing::warn!(document_id = %id, error = %err, "upsert_multi: document failed");
                    outcome.failed.push((id, err));
                }
            }
        }
    }

    outcome
}
