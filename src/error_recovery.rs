//! Retry policies for operations that may succeed on a later attempt.
//!
//! The detector may write an artifact asynchronously after `acquire` returns,
//! so the scan worker polls for it under a [`RetryPolicy`] before declaring it
//! missing.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
    /// Total time budget across all attempts and delays, if any.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Attempts spaced `interval` apart, bounded by a total wait of `total`.
    ///
    /// Always allows at least one attempt. Each attempt is cut off at the
    /// remaining budget.
    pub fn for_deadline(total: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (total.as_millis() / interval.as_millis().max(1)) as u32 + 1
        };
        Self {
            max_attempts: attempts.max(1),
            backoff_delay: interval,
            deadline: Some(total),
        }
    }
}

/// Run `operation` until it yields `Some`, up to `policy.max_attempts` times.
///
/// `operation` receives the time left before the policy deadline, or `None`
/// when the policy has no deadline. With a deadline, an attempt still running
/// when the budget runs out is cancelled, and no attempt starts after it
/// passed. Errors count as a failed attempt. Returns `None` once attempts or
/// time are exhausted.
pub async fn retry_until_some<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Option<T>
where
    F: FnMut(Option<Duration>) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let deadline = policy.deadline.map(|total| Instant::now() + total);
    let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

    for attempt in 0..policy.max_attempts {
        let budget = remaining();
        if attempt > 0 && budget.is_some_and(|b| b.is_zero()) {
            debug!(attempt, "Retry deadline passed");
            break;
        }
        let outcome = match budget {
            Some(budget) => timeout(budget, operation(Some(budget)))
                .await
                .unwrap_or(Ok(None)),
            None => operation(None).await,
        };
        match outcome {
            Ok(Some(value)) => return Some(value),
            Ok(None) => debug!(attempt, "Not available yet"),
            Err(e) => debug!(attempt, error = %e, "Attempt failed"),
        }
        if attempt + 1 < policy.max_attempts {
            let delay = remaining().map_or(policy.backoff_delay, |r| r.min(policy.backoff_delay));
            sleep(delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_policy_for_deadline() {
        let policy = RetryPolicy::for_deadline(Duration::from_secs(3), Duration::from_millis(200));
        assert_eq!(policy.max_attempts, 16);
        assert_eq!(policy.backoff_delay, Duration::from_millis(200));
        assert_eq!(policy.deadline, Some(Duration::from_secs(3)));

        let single = RetryPolicy::for_deadline(Duration::from_secs(3), Duration::ZERO);
        assert_eq!(single.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
            deadline: None,
        };
        let counter = &attempts;
        let result = retry_until_some(&policy, move |_| async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 2 {
                Ok(Some(n))
            } else {
                anyhow::bail!("not yet")
            }
        })
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
            deadline: None,
        };
        let counter = &attempts;
        let result: Option<()> = retry_until_some(&policy, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await;
        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_bounds_slow_attempts() {
        let policy =
            RetryPolicy::for_deadline(Duration::from_millis(300), Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let started = Instant::now();

        // Each attempt uses its whole budget before reporting nothing found
        let result: Option<()> = retry_until_some(&policy, move |budget| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(budget.unwrap_or_default()).await;
            Ok(None)
        })
        .await;

        let elapsed = started.elapsed();
        assert!(result.is_none());
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
        assert!(attempts.load(Ordering::SeqCst) < policy.max_attempts);
    }

    #[tokio::test]
    async fn test_attempts_receive_shrinking_budget() {
        let policy =
            RetryPolicy::for_deadline(Duration::from_millis(200), Duration::from_millis(40));
        let budgets = std::sync::Mutex::new(Vec::new());
        let seen = &budgets;

        let _: Option<()> = retry_until_some(&policy, move |budget| async move {
            seen.lock().unwrap().push(budget.unwrap());
            Ok(None)
        })
        .await;

        let budgets = budgets.into_inner().unwrap();
        assert!(budgets.len() >= 2);
        assert!(budgets[0] <= Duration::from_millis(200));
        assert!(budgets.windows(2).all(|w| w[1] < w[0]));
    }
}
