//! Bounded retry with exponential backoff around a [`PageSource`]
//!
//! Only transient failures (`SourceUnavailable`, `SourceRateLimited`) are
//! retried. A rate-limit response carrying `Retry-After` waits at least that
//! long. With `max_retries == 0` the wrapper is a pass-through.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::{Page, PageSource};
use crate::error::{IngestError, Result};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Sleep before the first retry; doubled for each further retry
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32, err: &IngestError) -> Duration {
        let exponential = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_BACKOFF);

        match err {
            IngestError::SourceRateLimited {
                retry_after_secs: Some(secs),
                ..
            } => exponential.max(Duration::from_secs(*secs)),
            _ => exponential,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Wraps a source and retries transient page-fetch failures.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: PageSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: PageSource> PageSource for RetryingSource<S> {
    async fn fetch_page(&self, start_index: u64, page_size: u64) -> Result<Page> {
        let mut attempt = 0;

        loop {
            match self.inner.fetch_page(start_index, page_size).await {
                Ok(page) => {
                    if attempt > 0 {
                        info!(start_index, attempt, "Page fetch succeeded after retry");
                    }
                    return Ok(page);
                },
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let wait = self.policy.backoff(attempt, &err);
                    warn!(
                        start_index,
                        attempt,
                        max_retries = self.policy.max_retries,
                        backoff_ms = wait.as_millis() as u64,
                        error = %err,
                        "Page fetch failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                },
                Err(err) => return Err(err),
            }
        }
    }
}
