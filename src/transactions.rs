//! C7 — Transaction Coordinator. Drives a user-supplied transaction body
//! against a fresh [`Transaction`] attempt, retrying classifier-retryable
//! failures and treating an ambiguous commit as terminal: an ambiguous
//! commit is reported with full context rather than silently retried,
//! since retrying could double-apply an already-committed write.

use crate::classify::classify_kind;
use crate::driver::{Cluster, Collection, GetResult, KvGetOptions, KvWriteOptions, MutationResult, Transaction};
use crate::error::{Cas, CouchbaseCoreError, DocumentId, ErrorKind};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 3;
const BASE_DELAY: Duration = Duration::from_millis(100);

fn attempt_backoff(attempt: usize) -> Duration {
    BASE_DELAY.saturating_mul(1u32 << attempt.saturating_sub(1).min(16) as u32)
}

/// Transaction-error retryability (local table, which
/// extends C1): `TransactionFailed`/`TransactionExpired`/`CasMismatch`
/// are retryable here even though they aren't breaker-tripping failures
/// under the general classifier; everything else falls back to C1.
fn is_retryable(err: &CouchbaseCoreError) -> bool {
    match err.kind() {
        Some(ErrorKind::TransactionFailed) | Some(ErrorKind::TransactionExpired) | Some(ErrorKind::CasMismatch) => true,
        Some(ErrorKind::DocumentExists) | Some(ErrorKind::DocumentNotFound) => false,
        Some(kind) => classify_kind(kind).is_retryable(),
        None => false,
    }
}

/// Runs `body` against a fresh transaction attempt, committing on success
/// and retrying up to [`MAX_ATTEMPTS`] times on classifier-retryable
/// failures. An ambiguous commit is never retried.
pub async fn execute_transaction<F, Fut>(cluster: &dyn Cluster, mut body: F) -> Result<(), CouchbaseCoreError>
where
    F: FnMut(Arc<dyn Transaction>) -> Fut,
    Fut: Future<Output = Result<(), CouchbaseCoreError>>,
{
    let mut last_err: Option<CouchbaseCoreError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let txn = cluster.begin_transaction().await?;
        tracing::debug!(attempt, transaction_id = txn.id(), "starting transaction attempt");

        match body(Arc::clone(&txn)).await {
            Ok(()) => match txn.commit().await {
                Ok(()) => {
                    tracing::debug!(transaction_id = txn.id(), "transaction committed");
                    return Ok(());
                }
                Err(err) if err.is_ambiguous() => {
                    tracing::error!(
                        transaction_id = txn.id(),
                        error = %err,
                        "transaction commit ambiguous; manual verification required before retrying or assuming failure"
                    );
                    if let Err(persist_err) = persist_ambiguous_commit_record(txn.id(), &err) {
                        tracing::error!(
                            transaction_id = txn.id(),
                            error = %persist_err,
                            "failed to persist ambiguous commit record; original error not masked"
                        );
                    }
                    return Err(CouchbaseCoreError::AmbiguousTransactionCommit {
                        context: err.to_string(),
                        transaction_id: txn.id().to_string(),
                    });
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt == MAX_ATTEMPTS {
                        return Err(err);
                    }
                    tracing::warn!(attempt, transaction_id = txn.id(), error = %err, "transaction commit failed, retrying");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                let _ = txn.rollback().await;
                if !is_retryable(&err) || attempt == MAX_ATTEMPTS {
                    return Err(err);
                }
                tracing::warn!(attempt, transaction_id = txn.id(), error = %err, "transaction body failed, retrying");
                last_err = Some(err);
            }
        }

        tokio::time::sleep(attempt_backoff(attempt)).await;
    }

    Err(last_err.expect("loop always records the last failure before exiting"))
}

/// Best-effort persistence of an ambiguous-commit record for later
/// investigation. The crate has no external store of its own, so the
/// logger is the persistence sink; state is ambiguous, data may or may
/// not have been applied, verify manually, consider idempotent
/// operations. A failure here is logged by the caller and never masks
/// the original commit error.
fn persist_ambiguous_commit_record(transaction_id: &str, err: &CouchbaseCoreError) -> Result<(), CouchbaseCoreError> {
    tracing::error!(
        transaction_id,
        error = %err,
        "state ambiguous; data may or may not have been applied; verify manually; consider idempotent operations"
    );
    Ok(())
}

/// Reads a document inside a transaction, treating document-state errors
/// (a missing document) as `Ok(None)` rather than propagating — mirrors
/// the non-transactional [`Collection::get`] contract so transaction
/// bodies don't need bespoke not-found handling.
pub async fn safe_get(txn: &dyn Transaction, collection: &dyn Collection, id: &DocumentId) -> Result<Option<GetResult>, CouchbaseCoreError> {
    txn.get(collection, id).await
}

/// Inserts inside a transaction. A `DocumentExists` failure is logged
/// before being re-raised, so the caller sees it in both the logs and
/// the returned error without the coordinator needing bespoke handling.
pub async fn safe_insert(txn: &dyn Transaction, collection: &dyn Collection, id: &DocumentId, value: Value) -> Result<(), CouchbaseCoreError> {
    match txn.insert(collection, id, value).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == Some(ErrorKind::DocumentExists) => {
            tracing::warn!(document_id = %id, "safe_insert: document already exists");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Replaces inside a transaction. A CAS mismatch is logged as a warning
/// before being re-raised.
pub async fn safe_replace(txn: &dyn Transaction, collection: &dyn Collection, id: &DocumentId, cas: Cas, value: Value) -> Result<(), CouchbaseCoreError> {
    match txn.replace(collection, id, cas, value).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == Some(ErrorKind::CasMismatch) => {
            tracing::warn!(document_id = %id, "safe_replace: CAS mismatch");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Non-transactional read-modify-write: fetches `id`, applies `update` to
/// its value, and replaces with the CAS from the read. Retries on
/// `CasMismatch` up to `max_attempts` times.
pub async fn atomic_update<F>(collection: &dyn Collection, id: &DocumentId, max_attempts: usize, mut update: F) -> Result<MutationResult, CouchbaseCoreError>
where
    F: FnMut(Option<Value>) -> Value,
{
    for attempt in 1..=max_attempts.max(1) {
        let current = collection.get(id, &KvGetOptions::default()).await?;
        let cas = current.as_ref().map(|g| g.cas.clone());
        let new_value = update(current.map(|g| g.value));

        let opts = KvWriteOptions { cas, ..Default::default() };
        match collection.replace(id, new_value, &opts).await {
            Ok(result) => return Ok(result),
            Err(err) if err.kind() == Some(crate::error::ErrorKind::CasMismatch) && attempt < max_attempts => continue,
            Err(err) => return Err(err),
        }
    }

    unreachable!("loop always returns on its last iteration")
}

/// One step of a [`batch_operation`] run.
pub enum BatchOp {
    Get { collection: Arc<dyn Collection>, id: DocumentId },
    Insert { collection: Arc<dyn Collection>, id: DocumentId, value: Value },
    Replace { collection: Arc<dyn Collection>, id: DocumentId, cas: Cas, value: Value },
    Remove { collection: Arc<dyn Collection>, id: DocumentId, cas: Cas },
}

pub enum BatchOpResult {
    Get(Option<GetResult>),
    Insert,
    Replace,
    Remove,
}

/// Runs a sequence of transactional operations against `txn` in order,
/// stopping at and propagating the first failure. Ops after a failure
/// never run.
pub async fn batch_operation(txn: &dyn Transaction, ops: Vec<BatchOp>) -> Result<Vec<BatchOpResult>, CouchbaseCoreError> {
    let mut results = Vec::with_capacity(ops.len());
    for op in ops {
        let result = match op {
            BatchOp::Get { collection, id } => txn.get(collection.as_ref(), &id).await.map(BatchOpResult::Get),
            BatchOp::Insert { collection, id, value } => txn.insert(collection.as_ref(), &id, value).await.map(|_| BatchOpResult::Insert),
            BatchOp::Replace { collection, id, cas, value } => {
                txn.replace(collection.as_ref(), &id, cas, value).await.map(|_| BatchOpResult::Replace)
            }
            BatchOp::Remove { collection, id, cas } => txn.remove(collection.as_ref(), &id, cas).await.map(|_| BatchOpResult::Remove),
        }?;
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::stub::{StubCluster, StubCollection, StubFailure};
    use serde_json::json;

    #[tokio::test]
    async fn successful_body_commits() {
        let cluster = StubCluster::new();
        let collection: Arc<dyn Collection> = StubCollection::new();
        let id = DocumentId::new("doc-1");

        let result = execute_transaction(cluster.as_ref(), |txn| {
            let collection = Arc::clone(&collection);
            let id = id.clone();
            async move { txn.insert(collection.as_ref(), &id, json!({"v": 1})).await }
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ambiguous_commit_is_never_retried() {
        let cluster = StubCluster::new();
        cluster.set_transaction_failure(StubFailure::AmbiguousTimeout);
        let collection: Arc<dyn Collection> = StubCollection::new();

        let result = execute_transaction(cluster.as_ref(), |_txn| async move { Ok(()) }).await;
        assert!(matches!(result, Err(CouchbaseCoreError::AmbiguousTransactionCommit { .. })));
        let _ = collection;
    }

    #[tokio::test]
    async fn atomic_update_applies_function_to_existing_value() {
        let collection = StubCollection::new();
        let id = DocumentId::new("counter");
        collection.get(&id, &KvGetOptions::default()).await.ok();
        collection
            .insert(&id, json!({"count": 1}), &KvWriteOptions::default())
            .await
            .unwrap();

        atomic_update(collection.as_ref(), &id, 3, |current| {
            let count = current.as_ref().and_then(|v| v.get("count")).and_then(|v| v.as_i64()).unwrap_or(0);
            json!({"count": count + 1})
        })
        .await
        .unwrap();

        let updated = collection.get(&id, &KvGetOptions::default()).await.unwrap().unwrap();
        assert_eq!(updated.value["count"], 2);
    }

    #[tokio::test]
    async fn batch_operation_stops_at_first_failure() {
        let cluster = StubCluster::new();
        let txn = cluster.begin_transaction().await.unwrap();

        let first: Arc<dyn Collection> = StubCollection::new();
        let second_concrete = StubCollection::new();
        second_concrete.set_failure(StubFailure::DocumentNotFound);
        let second: Arc<dyn Collection> = second_concrete;
        let third = StubCollection::new();

        let ops = vec![
            BatchOp::Insert { collection: Arc::clone(&first), id: DocumentId::new("doc-1"), value: json!({"v": 1}) },
            BatchOp::Get { collection: Arc::clone(&second), id: DocumentId::new("doc-2") },
            BatchOp::Insert { collection: Arc::clone(&third), id: DocumentId::new("doc-3"), value: json!({"v": 3}) },
        ];

        let result = batch_operation(txn.as_ref(), ops).await;
        assert!(result.is_err());

        let third_doc = third.get(&DocumentId::new("doc-3"), &KvGetOptions::default()).await.unwrap();
        assert!(third_doc.is_none(), "op after the failure must never run");
    }

    #[tokio::test]
    async fn safe_insert_reraises_on_existing_document() {
        let cluster = StubCluster::new();
        let collection = StubCollection::new();
        let id = DocumentId::new("doc-dup");
        collection.insert(&id, json!({"v": 1}), &KvWriteOptions::default()).await.unwrap();

        let txn = cluster.begin_transaction().await.unwrap();
        let err = safe_insert(txn.as_ref(), collection.as_ref(), &id, json!({"v": 2})).await.unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::DocumentExists));
    }
}
