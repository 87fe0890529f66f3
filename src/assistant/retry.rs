//! Retry with exponential backoff for transient service failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::assistant::clock::Sleeper;
use crate::config::RetryPolicy;
use crate::error::AssistantError;

/// Backoff before retry number `attempt` (1-based), without jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    policy
        .base_delay
        .saturating_mul(1u32 << exp)
        .min(policy.max_delay)
}

/// Run `call` until it succeeds, fails permanently, or the attempt budget is spent.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut call: F,
) -> Result<T, AssistantError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AssistantError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let base = backoff_delay(policy, attempt);
                // Jitter in [base/2, base].
                let delay = base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0));
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient error, retrying: {}",
                    e
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
