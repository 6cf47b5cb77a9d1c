//! Automatic reconnect policy.
//!
//! Delay before attempt `n` (0-indexed) is `min(base * 2^n, max)`. Once
//! `max_attempts` attempts have failed the binding gives up and settles at
//! `Disconnected` until a caller starts it again.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before attempt `attempt`, ignoring the attempt limit.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Backoff before attempt `attempt`, or `None` once the limit is reached.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay_for(attempt))
    }

    /// Every delay this policy will wait, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|n| self.delay_for(n))
    }
}

/// Result of a reconnect run.
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectOutcome<E> {
    /// Attempt `attempts` succeeded.
    Recovered { attempts: u32 },
    /// Every attempt failed.
    Exhausted { last_error: Option<E> },
}

/// Drive reconnect attempts one at a time.
///
/// `before_attempt` sees the attempt number and the delay about to be
/// slept; `attempt` performs the connection. Attempts never overlap.
pub async fn run_reconnect<F, Fut, E>(
    policy: &ReconnectPolicy,
    mut before_attempt: impl FnMut(u32, Duration),
    mut attempt: F,
) -> ReconnectOutcome<E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut n = 0;
    let mut last_error = None;

    while let Some(delay) = policy.next_delay(n) {
        before_attempt(n, delay);
        tokio::time::sleep(delay).await;

        match attempt(n).await {
            Ok(()) => return ReconnectOutcome::Recovered { attempts: n + 1 },
            Err(e) => {
                tracing::debug!("Reconnect attempt {} failed: {}", n + 1, e);
                last_error = Some(e);
            }
        }
        n += 1;
    }

    ReconnectOutcome::Exhausted { last_error }
}
