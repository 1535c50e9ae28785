//! Candle Source Trait
//!
//! Abstracts the market-data connection so the engine and the tests can run
//! against a live exchange, a replayed history or a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::errors::MarketDataError;
use crate::domain::services::indicators::Candle;

#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Most recent `count` candles for `instrument`, oldest first.
    async fn fetch(
        &self,
        instrument: &str,
        resolution: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

/// Fixed-count, fixed-delay retry for candle fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn once() -> Self {
        RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Fetches through `source`, retrying retryable failures up to `policy.attempts`
/// times. An empty response counts as a failure.
pub async fn fetch_with_retry(
    source: &dyn CandleSource,
    instrument: &str,
    resolution: &str,
    count: usize,
    policy: RetryPolicy,
) -> Result<Vec<Candle>, MarketDataError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match source.fetch(instrument, resolution, count).await {
            Ok(candles) if candles.is_empty() => {
                Err(MarketDataError::Empty(instrument.to_string()))
            }
            other => other,
        };

        match result {
            Ok(candles) => return Ok(candles),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Fetch {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    instrument, attempt, attempts, e, policy.delay
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
