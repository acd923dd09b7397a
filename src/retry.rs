// src/retry.rs
//! Fixed-delay retry wrapper for scheduled jobs.
//!
//! Polls get a few quick retries; report runs are costlier and get fewer,
//! slower ones. Errors that are not retryable end the run immediately.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PollError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self { max_retries, delay }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    pub fn for_polls(cfg: &RetryConfig) -> Self {
        Self::fixed(Duration::from_secs(cfg.poll_delay_secs), cfg.poll_max_retries)
    }

    pub fn for_reports(cfg: &RetryConfig) -> Self {
        Self::fixed(Duration::from_secs(cfg.report_delay_secs), cfg.report_max_retries)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned.
pub async fn run_with_retry<T, F, Fut>(policy: RetryPolicy, job: &str, mut op: F) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PollError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    target: "poller",
                    job,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_secs = policy.delay.as_secs_f64(),
                    error = %e,
                    "job failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                tracing::error!(target: "poller", job, attempts = attempt + 1, error = %e, "job failed");
                return Err(e);
            }
        }
    }
}
