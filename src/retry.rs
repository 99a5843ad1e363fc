//! Bounded exponential retry around remote calls.
//!
//! Call sites wrap a remote operation in `RetryExecutor::execute()`. An error
//! is retried only when it (or something in its `source()` chain) looks
//! transient; everything else is returned on the first failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Substrings (lowercase) that mark an error as safe to retry.
const TRANSIENT_MARKERS: &[&str] = &[
    "goaway",
    "i/o error",
    "connection reset",
    "connection closed",
    "timeout",
    "timed out",
    "502",
    "503",
    "504",
];

/// Largest exponent applied to the initial backoff.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// How many attempts to make and how long to wait before the second one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }
}

// ── Sleeping ────────────────────────────────────────────────────────

/// The backoff sleep was cut short by an interrupt.
#[derive(Debug, thiserror::Error)]
#[error("Backoff sleep interrupted")]
pub struct Interrupted;

/// Waits out a backoff delay.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration) -> Result<(), Interrupted>;
}

/// Real sleeper: tokio timer raced against Ctrl-C.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) -> Result<(), Interrupted> {
        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        tokio::select! {
            _ = &mut timer => Ok(()),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => Err(Interrupted),
                Err(e) => {
                    warn!(error = %e, "Could not listen for Ctrl-C, sleeping without interrupt");
                    (&mut timer).await;
                    Ok(())
                }
            },
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────

/// Runs fallible async operations under a `RetryPolicy`.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under this executor's own policy.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let policy = self.policy;
        self.execute_with(&policy, label, op).await
    }

    /// Run `op` until it succeeds, fails non-transiently, or `policy`
    /// runs out of attempts. The last error is returned unchanged.
    pub async fn execute_with<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        label: &str,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_transient(&err) {
                debug!(op = label, attempt, error = %err, "Non-transient failure, not retrying");
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(op = label, attempts = attempt, error = %err, "Retries exhausted");
                return Err(err);
            }

            let delay = policy.backoff_for(attempt);
            warn!(
                op = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, backing off"
            );

            if self.sleeper.sleep(delay).await.is_err() {
                warn!(op = label, attempt, "Interrupted during backoff");
                return Err(err);
            }

            attempt += 1;
        }
    }
}

/// True when the error or any of its causes mentions a transient marker.
pub fn is_transient(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}
