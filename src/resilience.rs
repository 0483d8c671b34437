//! Fixed-delay retry and polling helpers.
//!
//! The operator never backs off exponentially: attempts are cheap and
//! bounded, so every wait uses a [`RetryPolicy`] with a constant delay.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded attempt count with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    #[serde(with = "crate::config::humantime_serde")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// One initial attempt followed by `retries` retries.
    pub const fn with_retries(retries: u32, delay: Duration) -> Self {
        Self::fixed(retries + 1, delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

/// Outcome of an exhausted helper.
#[derive(Debug)]
pub enum Exhausted<E> {
    /// Every attempt failed; carries the last error.
    Failed { attempts: u32, last: E },
    /// The predicate never held.
    GaveUp { attempts: u32 },
}

// ============================================================================
// Retry
// ============================================================================

/// Run `f` until it succeeds or the policy is exhausted.
///
/// Sleeps `policy.delay` between failed attempts, never after the last one.
pub async fn retry<F, Fut, T, E>(policy: RetryPolicy, mut f: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                return Err(Exhausted::Failed {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                tracing::info!(
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                sleep(policy.delay).await;
            }
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `check` until it yields `Some`, an error, or attempts run out.
///
/// An `Err` from the check aborts immediately. Every unsatisfied attempt is
/// followed by `policy.delay`, so a poll that gives up has waited exactly
/// `max_attempts * delay`.
pub async fn poll_until<F, Fut, T, E>(policy: RetryPolicy, mut check: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => sleep(policy.delay).await,
            Err(e) => {
                return Err(Exhausted::Failed {
                    attempts: attempt,
                    last: e,
                })
            }
        }
    }

    Err(Exhausted::GaveUp {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_with_retries_counts_initial_attempt() {
        let policy = RetryPolicy::with_retries(5, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.delay, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry(RetryPolicy::fixed(5, Duration::from_secs(10)), |_| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_does_not_sleep_after_last() {
        let start = Instant::now();

        let result: Result<(), _> =
            retry(RetryPolicy::fixed(3, Duration::from_secs(1)), |attempt| async move {
                Err(format!("attempt {}", attempt))
            })
            .await;

        match result {
            Err(Exhausted::Failed { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "attempt 3");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_gives_up_after_full_wait() {
        let start = Instant::now();
        let polls = Arc::new(AtomicU32::new(0));

        let result: Result<(), Exhausted<String>> =
            poll_until(RetryPolicy::fixed(30, Duration::from_secs(2)), |_| {
                let polls = polls.clone();
                async move {
                    polls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .await;

        assert!(matches!(result, Err(Exhausted::GaveUp { attempts: 30 })));
        assert_eq!(polls.load(Ordering::SeqCst), 30);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_aborts_on_error() {
        let result: Result<(), Exhausted<&str>> =
            poll_until(RetryPolicy::fixed(10, Duration::from_secs(1)), |attempt| async move {
                if attempt == 2 {
                    Err("read failed")
                } else {
                    Ok(None)
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(Exhausted::Failed {
                attempts: 2,
                last: "read failed"
            })
        ));
    }
}
