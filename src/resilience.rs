//! Retry policy for remote calls that may fail while a cluster is starting.
//!
//! A single helper, [`retry`], wraps every potentially transient remote call.
//! Each call site passes its own [`RetryConfig`]:
//!
//! - [`RetryConfig::liveness()`]: server cold start, most generous bounds
//! - [`RetryConfig::reconcile()`]: replication job documents, moderate bounds
//! - [`RetryConfig::provisioning()`]: accounts and roles, tightest bounds
//!
//! Whichever bound is hit first (attempt count or overall wall-clock timeout)
//! stops retrying. Only [`ErrorKind::Transient`](crate::error::ErrorKind)
//! errors are retried; anything else is returned after the first attempt.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> couch_mesh::error::ProvisionResult<()> {
//! use couch_mesh::resilience::{retry, RetryConfig};
//!
//! let value = retry(&RetryConfig::provisioning(), "ensure account", || async {
//!     Ok::<_, couch_mesh::ProvisionError>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::error::{ProvisionError, ProvisionResult};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Bounds for one retry call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,

    /// Fixed delay between attempts.
    pub delay: Duration,

    /// Overall wall-clock ceiling across all attempts and delays.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reconcile()
    }
}

impl RetryConfig {
    /// Liveness probing during cluster cold start.
    ///
    /// 60 attempts, 2 seconds apart, at most 5 minutes in total.
    pub fn liveness() -> Self {
        Self {
            max_attempts: 60,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Replication job reconciliation.
    ///
    /// 5 attempts, 2 seconds apart, at most 1 minute in total.
    pub fn reconcile() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }

    /// Account and role provisioning.
    ///
    /// 5 attempts, 2 seconds apart, at most 30 seconds in total.
    pub fn provisioning() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy's bounds are exhausted.
///
/// On exhaustion the last error is returned inside
/// [`ProvisionError::RetryExhausted`]. An attempt still running when the
/// overall timeout expires is abandoned and counts as a
/// [`ProvisionError::Timeout`].
pub async fn retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut attempt_fn: F,
) -> ProvisionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProvisionResult<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let remaining = policy.timeout.saturating_sub(started.elapsed());
        let result = match timeout(remaining, attempt_fn()).await {
            Ok(result) => result,
            Err(_) => Err(ProvisionError::Timeout {
                operation: operation.to_string(),
                elapsed: started.elapsed(),
            }),
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        let out_of_time = started.elapsed() + policy.delay >= policy.timeout;
        if attempt >= max_attempts || out_of_time {
            return Err(ProvisionError::RetryExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        warn!(
            operation,
            attempt,
            delay_ms = policy.delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        metrics::record_retry(operation);
        sleep(policy.delay).await;
    }
}
