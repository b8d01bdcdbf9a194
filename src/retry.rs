//! Shared retry executor used by the query executor (C5), KV operations
//! (C6), and transaction coordinator (C7). Retryability and backoff shape
//! come from the error classifier (C1); this module only owns attempt
//! counting, jitter, and sleeping.

use crate::backoff::Backoff;
use crate::classify::classify_kind;
use crate::error::CouchbaseCoreError;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cap on how many prior attempts are reachable through the public API;
/// the executor itself only ever needs the last one.
pub const MAX_RETRY_FAILURES: usize = 10;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    /// Overrides the classifier's suggested backoff shape when set; left
    /// `None` to let each error kind pick its own (table).
    backoff_override: Option<Backoff>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .field("backoff_override", &self.backoff_override)
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, CouchbaseCoreError>
    where
        T: Send,
        Fut: Future<Output = Result<T, CouchbaseCoreError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut last_err: Option<CouchbaseCoreError> = None;

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let classification = err.kind().map(classify_kind);
                    let retryable = classification.as_ref().is_some_and(|c| c.is_retryable());

                    if !retryable {
                        return Err(err);
                    }

                    let backoff = self
                        .backoff_override
                        .clone()
                        .or_else(|| classification.and_then(|c| c.retry.to_backoff()));

                    last_err = Some(err);

                    if attempt + 1 >= self.max_attempts {
                        break;
                    }

                    if let Some(backoff) = backoff {
                        let delay = self.jitter.apply(backoff.delay(attempt + 1));
                        self.sleeper.sleep(delay).await;
                    }
                }
            }
        }

        Err(CouchbaseCoreError::RetryExhausted {
            attempts: self.max_attempts,
            last: Box::new(last_err.expect("loop always records the last failure before exiting")),
        })
    }
}

pub struct RetryPolicyBuilder {
    max_attempts: usize,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    backoff_override: Option<Backoff>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => write!(f, "max_attempts must be > 0 (got {})", n),
        }
    }
}

impl std::error::Error for BuildError {}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            jitter: Jitter::full(),
            sleeper: Arc::new(TokioSleeper),
            backoff_override: None,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff_override = Some(backoff);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            jitter: self.jitter,
            sleeper: self.sleeper,
            backoff_override: self.backoff_override,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
