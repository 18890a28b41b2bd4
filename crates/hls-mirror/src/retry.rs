// Bounded retries for a single origin fetch or sink push.
//
// The next poll is the primary recovery path; these retries only shorten the
// gap after a transient failure and are off by default.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomises the upper half of each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (0-based): `base * 2^retry`, capped.
    ///
    /// With jitter the pause lands in `[cap/2, cap]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }

        let floor = capped / 2;
        let spread_ms = u64::try_from((capped - floor).as_millis()).unwrap_or(u64::MAX);
        floor + Duration::from_millis(rand::rng().random_range(0..=spread_ms))
    }
}

/// Runs `call` once, then again after a backoff for every retryable error
/// until the policy is spent.
///
/// The first attempt always runs. Cancelling `token` interrupts a pending
/// backoff and yields [`MirrorError::Cancelled`].
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retry >= policy.max_retries || !err.is_retryable() {
            return Err(err);
        }

        let pause = policy.backoff(retry);
        debug!(
            operation,
            retry = retry + 1,
            of = policy.max_retries,
            pause_ms = pause.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(MirrorError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
        retry += 1;
    }
}
