//! Automatic retry with exponential backoff and jitter.
//!
//! Retries transient backend failures (network errors, 429, 500, 502, 503,
//! 504) with configurable exponential backoff. Never retries client errors
//! or malformed responses. The agent loop itself never retries; this lives
//! on the [`ChatClient`](crate::ChatClient) and is off by default.

use crate::api::backend::BackendError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first failure. Zero disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Shrink each delay by an attempt-dependent factor.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default schedule with `retries` extra attempts.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Sleep before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        if !self.jitter {
            return Duration::from_secs_f64(secs);
        }
        // Fixed factors keyed on the attempt; no rand dependency.
        const FACTORS: [f64; 4] = [0.75, 0.9, 0.6, 0.85];
        Duration::from_secs_f64(secs * FACTORS[attempt as usize % FACTORS.len()])
    }
}

/// Whether a backend error is worth retrying.
pub fn is_transient(error: &BackendError) -> bool {
    match error {
        BackendError::Request(_) => true,
        BackendError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
        BackendError::Api(_) | BackendError::Malformed(_) | BackendError::Script(_) => false,
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut call: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.max_retries && is_transient(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient backend error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
