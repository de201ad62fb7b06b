//! Retry helpers with linear or exponential backoff.
//!
//! The loop always stops on cancellation. Whether a non-retriable error ends
//! the loop early is a policy decision (`retry_non_retriable`), because some
//! providers report transient conditions with permanent-looking statuses.

use crate::{ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// After failed attempt `k`, wait `k * base_delay_ms`.
    #[default]
    Linear,
    /// After failed attempt `k`, wait `base_delay_ms * 2^(k-1)`.
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts (including the first try).
    pub max_attempts: u32,
    /// Base delay for backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter ratio as percentage (0..=100).
    pub jitter_ratio_pct: u32,
    /// Delay growth strategy.
    pub backoff: Backoff,
    /// Keep retrying errors classified as non-retriable.
    pub retry_non_retriable: bool,
}

impl RetryPolicy {
    /// Single attempt, no delay.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ratio_pct: 0,
            backoff: Backoff::Linear,
            retry_non_retriable: false,
        }
    }

    /// Linear policy without jitter.
    #[must_use]
    pub const fn linear(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: u64::MAX,
            jitter_ratio_pct: 0,
            backoff: Backoff::Linear,
            retry_non_retriable: false,
        }
    }

    /// Delay before the attempt that follows failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            Backoff::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            Backoff::Exponential => {
                let pow = attempt.saturating_sub(1).min(30);
                self.base_delay_ms.saturating_mul(1u64 << pow)
            },
        };
        let capped = raw.min(self.max_delay_ms);
        Duration::from_millis(apply_jitter(capped, self.jitter_ratio_pct, attempt))
    }

    const fn should_retry(self, attempt: u32, error: &ErrorEnvelope) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.retry_non_retriable || error.class.is_retriable()
    }
}

/// Retry a fallible async operation according to `policy`.
pub async fn retry_async<T, F, Fut>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_async_with_observer(ctx, policy, operation, &mut op, |_, _, _| {}).await
}

/// Retry with a callback invoked before each backoff sleep.
///
/// The observer receives the failed attempt number, the error, and the delay
/// that is about to be slept. The final error carries an `attempts` entry.
pub async fn retry_async_with_observer<T, F, Fut, Obs>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    op: &mut F,
    mut on_retry: Obs,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    Obs: FnMut(u32, &ErrorEnvelope, Duration),
{
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        ctx.ensure_not_cancelled(operation)?;

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                if !policy.should_retry(attempt, &error) {
                    return Err(error.with_metadata("attempts", attempt.to_string()));
                }

                let delay = policy.delay_after(attempt);
                on_retry(attempt, &error, delay);
                sleep_with_cancellation(ctx, delay, operation).await?;
            },
        }
    }
}

fn apply_jitter(delay_ms: u64, jitter_pct: u32, attempt: u32) -> u64 {
    let jitter_pct = u64::from(jitter_pct.min(100));
    if jitter_pct == 0 || delay_ms == 0 {
        return delay_ms;
    }
    let range = delay_ms.saturating_mul(jitter_pct) / 100;
    let spread = jitter_seed(attempt) % range.saturating_mul(2).saturating_add(1);
    delay_ms.saturating_sub(range).saturating_add(spread)
}

fn jitter_seed(attempt: u32) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| u64::from(duration.subsec_nanos()));
    nanos ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

async fn sleep_with_cancellation(
    ctx: &RequestContext,
    delay: Duration,
    operation: &'static str,
) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = ctx.cancelled() => Err(
            ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
        ),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
