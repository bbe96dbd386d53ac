//! Bounded exponential backoff around external fetches

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;

use crate::config::RetryConfig;
use crate::error::{HistoryError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait after the given failed attempt (1-based): doubles each time, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `fetch` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, date: NaiveDate, mut fetch: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(HistoryError::RetriesExhausted {
                        date,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let wait = self.backoff(attempt);
                    tracing::warn!(
                        %date,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
