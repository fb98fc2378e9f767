//! Bounded-attempt retries with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::StageError;

/// Backoff configuration for retryable operations.
///
/// Delays grow as `base_delay * 2^(attempt-1)` plus a random jitter to avoid
/// thundering herd.
///
/// # Example
///
/// ```
/// use shortcast_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(5)
///     .with_base_delay(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of calls (including the initial one)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound of the random jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(750),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Set the maximum number of attempts (minimum 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the jitter bound
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Delay before re-running after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff =
            self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter = if self.max_jitter.is_zero() {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..self.max_jitter.as_secs_f64())
        };
        Duration::from_secs_f64(backoff + jitter)
    }
}

/// Run `f` with the default backoff, retrying transient failures up to
/// `max_attempts` total calls.
///
/// Terminal errors propagate after a single call; a transient error on the
/// final attempt propagates as-is. `operation` only labels log lines.
pub async fn retry_call<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    f: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let policy = RetryPolicy::default().with_max_attempts(max_attempts);
    retry_with_policy(operation, &policy, f).await
}

/// Run `f` under an explicit policy. See [`retry_call`].
pub async fn retry_with_policy<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let transient = err.is_transient();
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    transient,
                    error = %err,
                    "operation failed"
                );
                if !transient || attempt >= max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn transient() -> StageError {
        StageError::Connection("connection refused".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_call("always_transient", 3, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), StageError>(transient())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_propagates_after_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_call("terminal", 5, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), StageError>(StageError::fatal("bad request"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_call("eventually_ok", 5, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        };

        for _ in 0..32 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }
}
