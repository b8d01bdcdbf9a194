//! Classifier purity and the never-retry-ambiguous set.

use couchbase_core::classify::classify_kind;
use couchbase_core::error::ErrorKind;

const ALL_KINDS: &[ErrorKind] = &[
    ErrorKind::DocumentNotFound,
    ErrorKind::DocumentExists,
    ErrorKind::CasMismatch,
    ErrorKind::DocumentLocked,
    ErrorKind::AuthenticationFailure,
    ErrorKind::Timeout,
    ErrorKind::UnambiguousTimeout,
    ErrorKind::AmbiguousTimeout,
    ErrorKind::RequestCanceled,
    ErrorKind::ServiceNotAvailable,
    ErrorKind::TemporaryFailure,
    ErrorKind::RateLimited,
    ErrorKind::QuotaLimited,
    ErrorKind::BucketNotFound,
    ErrorKind::ScopeNotFound,
    ErrorKind::CollectionNotFound,
    ErrorKind::IndexNotFound,
    ErrorKind::ParsingFailure,
    ErrorKind::PreparedStatementFailure,
    ErrorKind::DurabilityAmbiguous,
    ErrorKind::DurabilityImpossible,
    ErrorKind::DurableWriteInProgress,
    ErrorKind::PathNotFound,
    ErrorKind::PathExists,
    ErrorKind::PathMismatch,
    ErrorKind::PathInvalid,
    ErrorKind::Network,
    ErrorKind::TransactionCommitAmbiguous,
    ErrorKind::TransactionFailed,
    ErrorKind::TransactionExpired,
    ErrorKind::Unknown,
];

#[test]
fn classification_is_deterministic_for_every_kind() {
    for kind in ALL_KINDS {
        let first = classify_kind(*kind);
        let second = classify_kind(*kind);
        assert_eq!(first, second, "classify_kind({kind:?}) was not deterministic");
    }
}

#[test]
fn ambiguous_outcomes_are_never_retryable() {
    for kind in [ErrorKind::AmbiguousTimeout, ErrorKind::DurabilityAmbiguous, ErrorKind::TransactionCommitAmbiguous] {
        let classification = classify_kind(kind);
        assert!(!classification.is_retryable(), "{kind:?} must never be retryable");
        assert!(classification.is_ambiguous(), "{kind:?} must be classified ambiguous");
    }
}

#[test]
fn application_errors_are_never_critical_enough_to_trip_breaker_category() {
    use couchbase_core::classify::ErrorCategory;

    for kind in [ErrorKind::DocumentNotFound, ErrorKind::DocumentExists, ErrorKind::CasMismatch, ErrorKind::DocumentLocked] {
        assert_eq!(classify_kind(kind).category, ErrorCategory::Application, "{kind:?} must classify as Application");
    }
}
