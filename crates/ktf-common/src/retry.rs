//! Retry utilities with exponential backoff and jitter.
//!
//! Every retry loop here is bounded: [`RetryConfig::max_attempts`] is always
//! at least 1, and backoff sleeps stop as soon as the caller's [`Context`]
//! ends. [`retry_on_conflict`] re-runs only on conflicts; [`retry_transient`]
//! also re-runs on 429 and 5xx responses.
//!
//! # Example
//!
//! ```ignore
//! use ktf_common::retry::{retry_on_conflict, RetryConfig};
//!
//! retry_on_conflict(&ctx, &RetryConfig::default(), "label namespace", || async {
//!     let ns = cp.get_namespace(name).await?;
//!     cp.replace_namespace(&with_labels(ns)).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::context::Context;
use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (values below 1 act as 1)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Jittered delay for the current step: 0.5x to 1.5x of `delay`
    fn jittered(delay: Duration) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Re-run an operation while it fails with an error [`Error::is_retryable`]
/// accepts (conflicts, 429, 5xx).
///
/// Permanent errors are returned immediately, as is the last transient error
/// once the budget is spent. Backoff sleeps end early with
/// [`Error::ContextDone`] when `ctx` ends.
pub async fn retry_transient<F, Fut, T>(
    ctx: &Context,
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_while(ctx, config, operation_name, Error::is_retryable, operation).await
}

/// Re-run a read-modify-write operation while it fails with [`Error::Conflict`].
///
/// Each attempt must re-fetch the object so the retry applies the mutation to
/// the latest resourceVersion. Any other error is returned immediately, as is
/// the last conflict once the budget is spent. Backoff sleeps end early with
/// [`Error::ContextDone`] when `ctx` ends.
pub async fn retry_on_conflict<F, Fut, T>(
    ctx: &Context,
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_while(ctx, config, operation_name, Error::is_conflict, operation).await
}

async fn retry_while<F, Fut, T>(
    ctx: &Context,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: fn(&Error) -> bool,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Err(e) if should_retry(&e) && attempt < config.attempts() => {
                let jittered_delay = RetryConfig::jittered(delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "transient failure, retrying"
                );
                ctx.run(operation_name.to_string(), async {
                    tokio::time::sleep(jittered_delay).await;
                    Ok(())
                })
                .await?;
                delay = config.next_delay(delay);
            }
            Err(e) if should_retry(&e) => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "retry budget exhausted"
                );
                return Err(e);
            }
            other => return other,
        }
    }
}
