//! C1 — Error Classifier.
//!
//! A pure function from a [`DriverError`]'s [`ErrorKind`] to an
//! [`ErrorClassification`], mirroring the real Couchbase Rust SDK's
//! `RetryReason` table (see `retry.rs` in the SDK's `sdk-couchbase-core`
//! crate) rather than string-matching on an open error hierarchy.

use crate::backoff::Backoff;
use crate::error::{DriverError, ErrorKind};
use std::fmt;
use std::time::Duration;

/// How a classified error should be retried, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Never retry; the caller should surface the error immediately.
    None,
    /// Retry with a fixed delay between attempts.
    Constant(Duration),
    /// Retry with linearly increasing delay.
    Linear { base: Duration },
    /// Retry with exponential backoff up to a cap.
    Exponential { base: Duration, max: Duration },
}

/// Coarse bucket for where an error originated, used for logging/metrics
/// grouping (`ErrorClassification`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Client,
    Network,
    Server,
    Application,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Permanent,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The classifier's verdict on a single error. Category and disposition
/// are orthogonal to `should_alert`: a permanent, expected error (document
/// not found) never alerts, while a retryable-but-suspicious one might.
///
/// `max_attempts` and `retry`'s base delay come from the authoritative
/// per-kind retry table; a kind with `max_attempts == 0` is never retried
/// by the generic executor even if `max_attempts` is tracked for an
/// application-level retry loop instead (`CasMismatch`'s compare-and-swap
/// loop in C6/C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub disposition: Disposition,
    pub severity: Severity,
    pub retry: RetryStrategy,
    pub max_attempts: usize,
    pub should_alert: bool,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition, Disposition::Retryable)
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.disposition, Disposition::Ambiguous)
    }
}

impl RetryStrategy {
    /// Convert to the generic [`Backoff`] shape the retry executor applies
    /// jitter and sleeping to. Returns `None` for [`RetryStrategy::None`].
    pub fn to_backoff(self) -> Option<Backoff> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::Constant(delay) => Some(Backoff::constant(delay)),
            RetryStrategy::Linear { base } => Some(Backoff::linear(base)),
            RetryStrategy::Exponential { base, max } => Some(Backoff::exponential(base).with_max(max)),
        }
    }
}

#[allow(clippy::too_many_arguments)]
const fn classification(
    kind: ErrorKind,
    category: ErrorCategory,
    disposition: Disposition,
    severity: Severity,
    retry: RetryStrategy,
    max_attempts: usize,
    should_alert: bool,
) -> ErrorClassification {
    ErrorClassification { kind, category, disposition, severity, retry, max_attempts, should_alert }
}

/// Classify a driver error. This is the single source of truth for how
/// every `ErrorKind` is treated by the retry layer (C5/C6/C7) and the
/// circuit breaker (C2) — add new kinds here, not ad hoc at call sites.
pub fn classify(error: &DriverError) -> ErrorClassification {
    classify_kind(error.kind)
}

/// Same as [`classify`] but over a bare `ErrorKind`, for call sites (the
/// circuit breaker's failure gate) that only have the kind on hand.
pub fn classify_kind(kind: ErrorKind) -> ErrorClassification {
    use Disposition::*;
    use ErrorCategory::*;
    use RetryStrategy as R;
    use Severity::*;

    // Base delay used by kinds the table marks "default" rather than
    // giving an explicit baseDelay.
    let default_base = Duration::from_millis(50);
    let default_max = Duration::from_secs(2);

    match kind {
        ErrorKind::DocumentNotFound => {
            classification(kind, Application, Permanent, Info, R::None, 0, false)
        }
        ErrorKind::DocumentExists => {
            classification(kind, Application, Permanent, Info, R::None, 0, false)
        }
        // Retryable only through the application-level compare-and-swap
        // loop (C6/C7's `atomic_update`/transaction retry), never through
        // the generic executor — max_attempts/baseDelay carry the table's
        // app-loop values, but disposition stays Permanent so C1/C2/C4
        // never retry it blindly.
        ErrorKind::CasMismatch => {
            classification(kind, Application, Permanent, Info, R::Constant(Duration::from_millis(100)), 5, false)
        }
        ErrorKind::PathNotFound | ErrorKind::PathExists | ErrorKind::PathMismatch
        | ErrorKind::PathInvalid => {
            classification(kind, Application, Permanent, Info, R::None, 0, false)
        }
        ErrorKind::DocumentLocked => classification(
            kind,
            Server,
            Retryable,
            Warning,
            R::Exponential { base: default_base, max: default_max },
            3,
            false,
        ),
        ErrorKind::DurableWriteInProgress => classification(
            kind,
            Server,
            Retryable,
            Warning,
            R::Exponential { base: default_base, max: default_max },
            3,
            false,
        ),
        ErrorKind::TemporaryFailure => classification(
            kind,
            Server,
            Retryable,
            Warning,
            R::Exponential { base: Duration::from_millis(1000), max: default_max },
            3,
            false,
        ),
        ErrorKind::RateLimited => classification(
            kind,
            Server,
            Retryable,
            Warning,
            R::Exponential { base: Duration::from_millis(5000), max: Duration::from_secs(30) },
            2,
            false,
        ),
        ErrorKind::QuotaLimited => {
            classification(kind, Server, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::ServiceNotAvailable => classification(
            kind,
            Server,
            Retryable,
            Critical,
            R::Exponential { base: Duration::from_millis(1000), max: default_max },
            5,
            true,
        ),
        ErrorKind::RequestCanceled => classification(
            kind,
            Network,
            Retryable,
            Warning,
            R::Exponential { base: default_base, max: default_max },
            2,
            false,
        ),
        ErrorKind::Network => classification(
            kind,
            Network,
            Retryable,
            Warning,
            R::Exponential { base: Duration::from_millis(1000), max: default_max },
            3,
            false,
        ),
        ErrorKind::Timeout | ErrorKind::UnambiguousTimeout => classification(
            kind,
            Network,
            Retryable,
            Warning,
            R::Exponential { base: Duration::from_millis(2000), max: default_max },
            2,
            false,
        ),
        ErrorKind::AmbiguousTimeout => {
            // Never retried: a retry after an ambiguous timeout could
            // duplicate a write the server already applied.
            classification(kind, Network, Ambiguous, Critical, R::None, 0, true)
        }
        ErrorKind::DurabilityAmbiguous => {
            classification(kind, Server, Ambiguous, Critical, R::None, 0, true)
        }
        ErrorKind::DurabilityImpossible => {
            classification(kind, Server, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::AuthenticationFailure => {
            classification(kind, Client, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::BucketNotFound | ErrorKind::ScopeNotFound | ErrorKind::CollectionNotFound => {
            classification(kind, Client, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::IndexNotFound => {
            classification(kind, Application, Permanent, Warning, R::None, 0, false)
        }
        ErrorKind::ParsingFailure => {
            classification(kind, Client, Permanent, Warning, R::None, 0, false)
        }
        ErrorKind::PreparedStatementFailure => classification(
            kind,
            Server,
            Retryable,
            Warning,
            R::Constant(Duration::from_millis(10)),
            2,
            false,
        ),
        ErrorKind::TransactionCommitAmbiguous => {
            classification(kind, Server, Ambiguous, Critical, R::None, 0, true)
        }
        ErrorKind::TransactionExpired => {
            classification(kind, Server, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::TransactionFailed => {
            classification(kind, Server, Permanent, Critical, R::None, 0, true)
        }
        ErrorKind::Unknown => {
            classification(kind, Application, Permanent, Critical, R::None, 0, true)
        }
    }
}

/// Fallback classification for raw transport errors the driver didn't tag
/// with an `ErrorKind` at all, matched by substring against the message.
/// Only used when a driver implementation surfaces an untyped
/// `std::io::Error`-style message instead of a proper `DriverError`.
pub fn classify_raw_message(message: &str) -> ErrorClassification {
    let lower = message.to_ascii_lowercase();
    let looks_like_network = ["connection reset", "broken pipe", "connection refused", "timed out", "timeout"]
        .iter()
        .any(|needle| lower.contains(needle));

    if looks_like_network {
        classify(&DriverError::new(ErrorKind::Network, message))
    } else {
        classify(&DriverError::new(ErrorKind::Unknown, message))
    }
}
