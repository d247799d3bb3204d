//! Bounded exponential backoff around a fallible async operation.
//!
//! Attempt `k` (0-indexed) that fails waits `base_delay * 2^k` before the
//! next attempt. No jitter, no cap. The last error is returned once
//! `max_attempts` is exhausted.
//!
//! [`RetryPolicy::run_observed`] reports every failed attempt, including the
//! last one, to an [`AttemptObserver`] before deciding whether to wait.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy for network fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    800
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Wait after a failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Check if another attempt follows a failed attempt (0-indexed)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Run `operation` until it succeeds or attempts are exhausted
    pub async fn run<T, F, Fut>(&self, what: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_observed(what, operation, &mut IgnoreAttempts).await
    }

    /// Like [`RetryPolicy::run`], reporting each failed attempt to `observer`.
    ///
    /// An observer error aborts the loop and is returned as is.
    pub async fn run_observed<T, F, Fut>(
        &self,
        what: &str,
        mut operation: F,
        observer: &mut dyn AttemptObserver,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retry_in = self
                .should_retry(attempt)
                .then(|| self.delay_for_attempt(attempt));

            observer
                .attempt_failed(&AttemptFailure {
                    what,
                    attempt: attempt + 1,
                    error: format!("{:#}", error),
                    retry_in,
                })
                .await?;

            match retry_in {
                Some(delay) => {
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }
}

/// One failed attempt as seen by an [`AttemptObserver`]
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure<'a> {
    /// Operation label passed to the policy
    pub what: &'a str,
    /// 1-indexed attempt number
    pub attempt: u32,
    pub error: String,
    /// Wait before the next attempt; `None` when this was the last one
    pub retry_in: Option<Duration>,
}

/// Receives every failed attempt of an observed retry loop
#[async_trait]
pub trait AttemptObserver: Send {
    async fn attempt_failed(&mut self, failure: &AttemptFailure<'_>) -> Result<()>;
}

struct IgnoreAttempts;

#[async_trait]
impl AttemptObserver for IgnoreAttempts {
    async fn attempt_failed(&mut self, _failure: &AttemptFailure<'_>) -> Result<()> {
        Ok(())
    }
}
