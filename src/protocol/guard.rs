// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Failure classification around guarded operations.
//!
//! [`guarded`] is applied at the call site of every public operation that
//! talks to the cloud. Timeouts and cancellations become "no result",
//! [`Error::CloseRequested`] passes through untouched, and every other error
//! is logged with the operation's (obfuscated) arguments before it is
//! returned.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::redact::obfuscate;

/// Runs `fut` with a deadline and classifies its outcome.
///
/// Returns `Ok(None)` if the deadline passes or the operation reports
/// [`Error::Cancelled`].
///
/// # Errors
///
/// Returns every other error of `fut` unchanged.
pub async fn guarded<T, F>(
    operation: &str,
    args: &Value,
    timeout: Duration,
    fut: F,
) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(Some(value)),
        Ok(Err(Error::CloseRequested)) => Err(Error::CloseRequested),
        Ok(Err(Error::Cancelled(reason))) => {
            tracing::warn!(
                operation,
                args = %obfuscate(args),
                reason = %reason,
                "Operation cancelled"
            );
            Ok(None)
        }
        Ok(Err(err)) => {
            tracing::warn!(
                operation,
                args = %obfuscate(args),
                error = %err,
                "Operation failed"
            );
            Err(err)
        }
        Err(_) => {
            tracing::warn!(
                operation,
                args = %obfuscate(args),
                timeout_ms = timeout.as_millis(),
                "Operation timed out"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn success_is_some() {
        let out = guarded("op", &json!({}), LONG, async { Ok(7) }).await;
        assert_eq!(out.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn cancellation_is_none() {
        let out: Result<Option<()>> = guarded("op", &json!({}), LONG, async {
            Err(Error::Cancelled("shutdown".to_string()))
        })
        .await;
        assert!(out.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_none() {
        let out: Result<Option<()>> = guarded("op", &json!({}), Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(out.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_requested_propagates() {
        let out: Result<Option<()>> =
            guarded("op", &json!({}), LONG, async { Err(Error::CloseRequested) }).await;
        assert!(matches!(out, Err(Error::CloseRequested)));
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let out: Result<Option<()>> = guarded("op", &json!({"pwd": "x"}), LONG, async {
            Err(Error::Connection("down".to_string()))
        })
        .await;
        assert!(matches!(out, Err(Error::Connection(_))));
    }
}
