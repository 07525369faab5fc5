//! 🔁 Retry plumbing: "have you tried turning it off and on again", but with math.
//!
//! Two pieces live here. `ExponentialBackoff` says how long to nap before attempt N.
//! `retry_remote` runs a fallible async op under that policy, but only retries errors
//! that admit they're worth retrying (see [`Retryable`]). A 404 does not get a second
//! date. A 503 gets as many as the policy allows.
//!
//! 🦆 The duck retries nothing. The duck got it right the first time.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Retryable;

/// ⏳ `base * 2^attempt`, capped at `max_attempts` total tries.
///
/// `attempt` is zero-based: the nap after the first failure is `base`, then `2*base`,
/// then `4*base`. With the default 1s base and 3 attempts that's 1s then 2s, and no
/// nap after the last try because nobody is waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// 📐 Delay after the zero-based `attempt` failed. Saturates instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// 🧮 At least one attempt, always. Zero attempts is just giving up with extra steps.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// 🔁 Run `op` until it succeeds, fails in a way it shouldn't retry, or the budget is gone.
///
/// `op` receives the zero-based attempt number, mostly so logs can say which try it was.
/// The last error is returned untouched.
pub(crate) async fn retry_remote<T, E, F, Fut>(
    policy: &ExponentialBackoff,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "🔁 {what}: attempt {}/{} failed ({err}), retrying in {:?}",
                    attempt + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
