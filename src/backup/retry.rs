//! Retry policy for platform writes.
//!
//! Only throttled calls are retried. A hard failure is returned on the first
//! attempt so the caller can record it and move on.

use std::future::Future;
use std::time::Duration;

use crate::platform::{CallResult, PlatformError};

/// Wait between attempts when the platform gave no retry interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How many times, and how long between, a throttled call is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. 1 disables retrying.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Run `call`, sleeping and retrying while it reports `Throttled`.
    ///
    /// The server-indicated `retry_after` takes precedence over the backoff.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> CallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(PlatformError::Throttled { retry_after }) if attempt < max_attempts => {
                    let wait = if retry_after.is_zero() {
                        self.backoff.delay(attempt)
                    } else {
                        retry_after
                    };
                    tracing::debug!(
                        call = label,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Throttled, retrying after wait"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
