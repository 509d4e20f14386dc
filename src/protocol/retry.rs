// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exponential backoff for transient request failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

/// Bounds for retrying transient failures.
///
/// Delays double from `base_delay` up to `max_delay`. Retrying stops after
/// `max_attempts` calls or once the next delay would push the total elapsed
/// time past `max_elapsed`, whichever comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_elapsed: Duration,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_elapsed: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the maximum number of calls, first one included.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the maximum total time spent retrying.
    #[must_use]
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the upper bound of a single delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the maximum number of calls.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the maximum total retry time.
    #[must_use]
    pub fn max_elapsed(&self) -> Duration {
        self.max_elapsed
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
///
/// The last error is returned on exhaustion.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_retryable() => {
                let delay = policy.delay_for(attempt);
                if attempt >= policy.max_attempts
                    || started.elapsed() + delay > policy.max_elapsed
                {
                    tracing::warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Giving up after retries"
                    );
                    return Err(err);
                }
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_four_rate_limits() {
        let started = Instant::now();
        let mut calls = 0;
        let result = with_retry(&RetryPolicy::default(), "test", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 5 {
                    Err(Error::TooManyRequests("429".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls, 5);
        assert!(started.elapsed() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&RetryPolicy::default(), "test", || {
            calls += 1;
            async { Err(Error::Connection("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_elapsed_budget_spent() {
        let policy = RetryPolicy::default().with_max_elapsed(Duration::from_secs(5));
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, "test", || {
            calls += 1;
            async { Err(Error::Connection("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        // 1 s + 2 s fit in the budget, the next 4 s delay does not.
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&RetryPolicy::default(), "test", || {
            calls += 1;
            async { Err(Error::login("401")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Login(_))));
        assert_eq!(calls, 1);
    }
}
