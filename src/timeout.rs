//! Timeout policy for bounding async operation duration.
//!
//! Semantics
//! - Wraps an async operation and returns a timeout `DriverError` when the deadline elapses.
//! - Uses `tokio::time::timeout`; on timeout the inner future is dropped (not forcibly aborted),
//!   so cancellation-unsafe work may leave partial state.
//! - Requires a Tokio runtime.
//!
//! Invariants:
//! - Duration must be > 0 and <= the configured maximum.
//! - Successful operations pass through untouched.
//!
//! ```
//! use couchbase_core::{CouchbaseCoreError, TimeoutPolicy};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CouchbaseCoreError> {
//! let policy = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();
//!
//! let result = policy
//!     .execute(|| async {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!         Ok::<_, CouchbaseCoreError>(())
//!     })
//!     .await;
//!
//! assert!(result.is_ok());
//! # Ok(())
//! # }
//! ```

use crate::error::{CouchbaseCoreError, DriverError, ErrorKind};
use std::future::Future;
use std::time::Duration;

/// Maximum allowed timeout duration (30 days), to avoid runaway timers
/// while permitting long-running analytics/query work.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutConfigError {
    ZeroDuration,
    ExceedsMaximum { requested: Duration, limit: Duration },
}

impl std::fmt::Display for TimeoutConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutConfigError::ZeroDuration => write!(f, "timeout duration must be greater than zero"),
            TimeoutConfigError::ExceedsMaximum { requested, limit } => {
                write!(f, "timeout {:?} exceeds maximum {:?}", requested, limit)
            }
        }
    }
}

impl std::error::Error for TimeoutConfigError {}

/// Bounds an async operation's wall-clock duration. The connection
/// manager (C4), query executor (C5), and KV operations (C6) each carry
/// their own `TimeoutPolicy` per-service timeout knobs.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, TimeoutConfigError> {
        Self::new_with_max(duration, MAX_TIMEOUT)
    }

    pub fn new_with_max(duration: Duration, max: Duration) -> Result<Self, TimeoutConfigError> {
        if duration.is_zero() {
            return Err(TimeoutConfigError::ZeroDuration);
        }
        if duration > max {
            return Err(TimeoutConfigError::ExceedsMaximum { requested: duration, limit: max });
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, CouchbaseCoreError>
    where
        Fut: Future<Output = Result<T, CouchbaseCoreError>>,
        Op: FnOnce() -> Fut,
    {
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => Err(CouchbaseCoreError::Driver(DriverError::new(
                ErrorKind::UnambiguousTimeout,
                format!("operation exceeded {:?}", self.duration),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_duration() {
        assert_eq!(TimeoutPolicy::new(Duration::ZERO), Err(TimeoutConfigError::ZeroDuration));
    }

    #[test]
    fn rejects_duration_past_configured_max() {
        let err = TimeoutPolicy::new_with_max(Duration::from_secs(10), Duration::from_secs(5)).unwrap_err();
        assert_eq!(
            err,
            TimeoutConfigError::ExceedsMaximum { requested: Duration::from_secs(10), limit: Duration::from_secs(5) }
        );
    }

    #[tokio::test]
    async fn successful_operation_passes_through() {
        let policy = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();
        let result = policy.execute(|| async { Ok::<_, CouchbaseCoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_millis(20)).unwrap();
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, CouchbaseCoreError>(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), Some(ErrorKind::UnambiguousTimeout));
    }
}
