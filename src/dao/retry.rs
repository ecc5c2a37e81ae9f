//! Generic exponential-backoff helper shared by storage backends and the
//! transaction runner.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub initial_delay: Duration,
    /// Upper bound of a single delay.
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy used when establishing a database connection.
    pub const CONNECT: RetryPolicy = RetryPolicy {
        max_attempts: 10,
        initial_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(5),
        jitter: false,
    };

    /// Policy used when an optimistic commit loses a race.
    pub const CONTENTION: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(200),
        jitter: true,
    };

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        if self.jitter && !base.is_zero() {
            let extra = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
            base + Duration::from_millis(extra)
        } else {
            base
        }
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or the
/// policy runs out of attempts. The last error is returned.
pub async fn with_backoff<T, E, F, Fut, R>(
    policy: RetryPolicy,
    mut should_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && should_retry(&err) => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
