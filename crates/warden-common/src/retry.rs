//! Bounded retry with exponential backoff and jitter
//!
//! Used for backend calls that are expected to settle shortly, such as
//! waiting for the control plane to populate a freshly created service
//! account token. Access decisions are never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Retry schedule
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (minimum 1)
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with a given attempt count and default delays
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted
///
/// Returns the last error when every attempt failed.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                warn!(operation = %operation_name, attempt, error = %e, "Giving up");
                return Err(e);
            }
            Err(e) => {
                let factor = rand::thread_rng().gen_range(0.5..1.5);
                let pause = delay.mul_f64(factor).min(policy.max_delay);
                debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = pause.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(pause).await;
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
            }
        }
    }
}
