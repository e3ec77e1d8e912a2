use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::warn;

use crate::error::{FeedError, Result};

/// Bounded exponential backoff for transient provider failures.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(FeedError::Config("retry.attempts must be positive".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(FeedError::Config(format!(
                "retry.multiplier must be a finite number of at least 1, got {}",
                self.multiplier
            )));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(FeedError::Config(format!(
                "retry.max_backoff_ms ({}) is below retry.initial_backoff_ms ({})",
                self.max_backoff.as_millis(),
                self.initial_backoff.as_millis()
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_backoff, self.max_backoff, self.multiplier)
    }

    /// Runs `op` under `timeout`, retrying `Transport` failures.
    ///
    /// Non-retryable errors pass through unchanged; a transient failure that
    /// outlives the budget becomes [`FeedError::Unavailable`].
    pub async fn run<T, F, Fut>(&self, timeout: Duration, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut backoff = self.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FeedError::Transport(format!(
                    "{label} timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        %err,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "{label} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(FeedError::Unavailable {
                        attempts: attempt,
                        message: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff with ±25% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current: initial,
        }
    }

    /// Out-of-range products (negative, NaN, overflow) clamp to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(self.max, grown);
        let jitter = rand::random::<f64>() * 0.5 - 0.25;
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter)).unwrap_or(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
