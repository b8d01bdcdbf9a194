//! Error taxonomy for the Couchbase core: the closed set of driver error
//! kinds, the classifier's verdict on each, and the crate's own error type.

use std::fmt;
use thiserror::Error;

/// Opaque Compare-And-Swap token. Never exposed as a numeric type (Design
/// Note (e)): callers treat it as an immutable byte string round-tripped
/// from a prior read to a subsequent mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cas(String);

impl Cas {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Cas {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Cas {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Document key. A thin newtype for call-site type-safety; costs nothing
/// at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The closed set of error kinds raised by the driver contract. This
/// mirrors the `ErrorKind`/`ServerErrorKind` split used by the real
/// Couchbase Rust SDK's retry layer, rather than matching on open-ended
/// type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    DocumentNotFound,
    DocumentExists,
    CasMismatch,
    DocumentLocked,
    AuthenticationFailure,
    Timeout,
    UnambiguousTimeout,
    AmbiguousTimeout,
    RequestCanceled,
    ServiceNotAvailable,
    TemporaryFailure,
    RateLimited,
    QuotaLimited,
    BucketNotFound,
    ScopeNotFound,
    CollectionNotFound,
    IndexNotFound,
    ParsingFailure,
    PreparedStatementFailure,
    DurabilityAmbiguous,
    DurabilityImpossible,
    DurableWriteInProgress,
    PathNotFound,
    PathExists,
    PathMismatch,
    PathInvalid,
    Network,
    /// Transaction outcome in which the coordinator cannot determine
    /// whether the commit was applied.
    TransactionCommitAmbiguous,
    TransactionFailed,
    TransactionExpired,
    /// Catch-all for driver errors this crate does not recognize by kind;
    /// classified conservatively (non-retryable, critical).
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compact, loggable context carried alongside a classified error.
/// Corresponds to `ErrorContext`.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub message: String,
    pub error_name: String,
    pub code: Option<i64>,
    pub operation: Option<String>,
    pub document_key: Option<String>,
    pub is_retryable: bool,
    pub is_critical: bool,
    pub is_transient: bool,
    pub cas: Option<String>,
    pub statement: Option<String>,
    pub query_id: Option<String>,
}

/// An error surfaced by the driver, already tagged with its `ErrorKind`.
/// This is the input to the classifier (C1) and the payload type of
/// [`CouchbaseCoreError::Driver`].
#[derive(Debug, Clone)]
pub struct DriverError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DriverError {}

/// Unified error surface for the crate. Every driver error kind is
/// re-exported under a stable name here, plus the two errors this layer
/// itself introduces.
#[derive(Debug, Error, Clone)]
pub enum CouchbaseCoreError {
    #[error("{0}")]
    Driver(#[from] DriverError),

    /// The circuit breaker is open; fast-failed without dispatching to
    /// the driver.
    #[error("circuit breaker open (failures={failure_count}, retry after {retry_after_ms}ms)")]
    CircuitBreakerOpen { failure_count: usize, retry_after_ms: u64 },

    /// A transaction committed ambiguously: the coordinator cannot tell
    /// whether the commit was applied. Never retried; always surfaced
    /// with investigation context attached.
    #[error("transaction commit ambiguous: {context}")]
    AmbiguousTransactionCommit { context: String, transaction_id: String },

    /// Retries were exhausted; this wraps the last observed driver error.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: usize, last: Box<CouchbaseCoreError> },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CouchbaseCoreError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CouchbaseCoreError::Driver(e) => Some(e.kind),
            CouchbaseCoreError::RetryExhausted { last, .. } => last.kind(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CouchbaseCoreError::CircuitBreakerOpen { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, CouchbaseCoreError::AmbiguousTransactionCommit { .. })
            || matches!(
                self.kind(),
                Some(ErrorKind::AmbiguousTimeout)
                    | Some(ErrorKind::DurabilityAmbiguous)
                    | Some(ErrorKind::TransactionCommitAmbiguous)
            )
    }
}
