use crate::{AuthError, AuthResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry behavior for loading the auth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after attempt `n` is `n × step`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is used up. `op` receives the attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> AuthResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
